use crate::att::ErrorCode;
use crate::gap::Service as Svc;
use crate::le::RawAddr;

use super::*;

const PEER: Addr = Addr::Random(RawAddr::from_le_bytes([0x10, 0x20, 0x30, 0x40, 0x50, 0xC0]));
const ID: ConnId = ConnId(7);

fn h(v: u16) -> Handle {
    Handle::new(v).unwrap()
}

/// Registry with a single connection to `PEER`.
fn reg(peer: Peer) -> ConnectionRegistry {
    let mut r = ConnectionRegistry::new();
    assert!(r.open(ID, peer));
    r
}

fn step(r: &mut ConnectionRegistry, store: &MemStore, cfg: &Config, ev: Event) -> Vec<Action> {
    let (conn, srv) = r.blocks_mut(ID).unwrap();
    Driver {
        conn,
        srv,
        store,
        cfg,
    }
    .handle(ev)
}

fn start(r: &mut ConnectionRegistry, store: &MemStore, cfg: &Config, svc_chg: bool) -> Vec<Action> {
    let (conn, srv) = r.blocks_mut(ID).unwrap();
    Driver {
        conn,
        srv,
        store,
        cfg,
    }
    .start(svc_chg)
}

fn state(r: &ConnectionRegistry) -> State {
    r.find_server(ID).unwrap().state.clone()
}

fn saved_db() -> Database {
    let mut b = DatabaseBuilder::new();
    b.add_service(h(1), h(3), Svc::Battery.uuid(), true).unwrap();
    b.build()
}

#[test]
fn hash_read() {
    let (store, cfg) = (MemStore::new(), Config::default());
    let mut r = reg(Peer::new(PEER).lmp_version(0x0B));
    let a = start(&mut r, &store, &cfg, false);
    assert_eq!(
        a,
        [Action::ReadByType(HandleRange::ALL, Char::DatabaseHash.uuid())]
    );
    assert_eq!(state(&r), State::ReadingHashPreDiscovery);
    assert_eq!(r.find(ID).unwrap().request, Request::ReadHash);

    // Invalid hash length falls back to full discovery
    let a = step(&mut r, &store, &cfg, Event::ReadComplete(Ok(vec![0; 15])));
    assert_eq!(a, [Action::DiscoverPrimaryServices(HandleRange::ALL)]);
    assert_eq!(state(&r), State::DiscoveringServices);
    assert_eq!(r.find(ID).unwrap().request, Request::None);
}

#[test]
fn service_changed_hash_read() {
    let (store, cfg) = (MemStore::new(), Config::default());
    let mut r = reg(Peer::new(PEER).lmp_version(0x0B).bonded(true));
    assert!(store.save_by_identity(PEER, &saved_db()));
    start(&mut r, &store, &cfg, true);
    assert_eq!(state(&r), State::ReadingHashForServiceChanged);

    // The identity cache is not used after Service Changed
    let ev = Event::ReadComplete(Err(TransportError::Att(ErrorCode::AttributeNotFound)));
    let a = step(&mut r, &store, &cfg, ev);
    assert_eq!(a, [Action::DiscoverPrimaryServices(HandleRange::ALL)]);
}

#[test]
fn identity_fallback() {
    let (store, cfg) = (MemStore::new(), Config::default());
    let mut r = reg(Peer::new(PEER).lmp_version(0x0B).bonded(true));
    assert!(store.save_by_identity(PEER, &saved_db()));
    start(&mut r, &store, &cfg, false);
    let ev = Event::ReadComplete(Err(TransportError::Att(ErrorCode::AttributeNotFound)));
    assert_eq!(step(&mut r, &store, &cfg, ev), [Action::Complete(Ok(()))]);
    assert_eq!(*r.database(ID).unwrap(), saved_db());
    assert_eq!(state(&r), State::Complete(Ok(())));
}

#[test]
fn unsupported_peer() {
    let store = MemStore::new();
    let cfg = Config {
        robust_caching: false,
        ..Config::default()
    };
    let mut r = reg(Peer::new(PEER).bonded(true));
    assert!(store.save_by_identity(PEER, &saved_db()));
    assert_eq!(start(&mut r, &store, &cfg, false), [Action::Complete(Ok(()))]);
    // In-memory database is reused
    assert_eq!(start(&mut r, &store, &cfg, false), [Action::Complete(Ok(()))]);
    let a = start(&mut r, &store, &cfg, true);
    assert_eq!(a, [Action::DiscoverPrimaryServices(HandleRange::ALL)]);
}

#[test]
fn stale_events() {
    let (store, cfg) = (MemStore::new(), Config::default());
    let mut r = reg(Peer::new(PEER));
    let svc = Event::Result(DiscoveryResult::Service {
        start: h(1),
        end: h(3),
        uuid: Svc::Battery.uuid(),
    });
    let done = Event::DiscoveryComplete {
        phase: Phase::PrimaryServices,
        status: Ok(()),
    };
    assert!(step(&mut r, &store, &cfg, svc.clone()).is_empty());
    assert!(step(&mut r, &store, &cfg, done.clone()).is_empty());
    assert!(step(&mut r, &store, &cfg, Event::ReadComplete(Ok(vec![]))).is_empty());
    assert!(step(&mut r, &store, &cfg, Event::SdpComplete(Ok(vec![]))).is_empty());
    assert_eq!(state(&r), State::Idle);

    // Lmp version is unknown, so discovery starts immediately
    let a = start(&mut r, &store, &cfg, false);
    assert_eq!(a, [Action::DiscoverPrimaryServices(HandleRange::ALL)]);
    assert!(step(&mut r, &store, &cfg, svc).is_empty());
    // Inconsistent results are dropped
    let bad = Event::Result(DiscoveryResult::Service {
        start: h(2),
        end: h(5),
        uuid: Svc::Glucose.uuid(),
    });
    assert!(step(&mut r, &store, &cfg, bad).is_empty());
    // Completion of a procedure that was not issued
    let chars = Event::DiscoveryComplete {
        phase: Phase::Characteristics,
        status: Ok(()),
    };
    assert!(step(&mut r, &store, &cfg, chars.clone()).is_empty());
    assert_eq!(state(&r), State::DiscoveringServices);

    let a = step(&mut r, &store, &cfg, done.clone());
    assert_eq!(a, [Action::DiscoverIncludedServices(HandleRange::try_new(1, 3).unwrap())]);
    assert_eq!(state(&r), State::DiscoveringIncludedServices);
    let srv = r.find_server(ID).unwrap();
    assert_eq!(srv.outstanding, Some(a[0].clone()));
    assert_eq!(srv.pending.as_ref().map(DatabaseBuilder::in_progress), Some(true));

    // Duplicate and out-of-order completions do not issue new requests
    assert!(step(&mut r, &store, &cfg, done).is_empty());
    assert!(step(&mut r, &store, &cfg, chars).is_empty());
    assert_eq!(state(&r), State::DiscoveringIncludedServices);
    assert_eq!(r.find_server(ID).unwrap().outstanding, Some(a[0].clone()));
}

#[test]
fn empty_database() {
    let (store, cfg) = (MemStore::new(), Config::default());
    let mut r = reg(Peer::new(PEER));
    start(&mut r, &store, &cfg, false);
    let done = Event::DiscoveryComplete {
        phase: Phase::PrimaryServices,
        status: Ok(()),
    };
    assert_eq!(step(&mut r, &store, &cfg, done), [Action::Complete(Ok(()))]);
    assert!(r.database(ID).unwrap().is_empty());
    assert!(store.load_by_hash(Database::default().hash()).is_some());
}

#[test]
fn failed_issue() {
    let e = TransportError::NotIssued;
    let a = Action::DiscoverDescriptors(HandleRange::ALL);
    assert_eq!(
        a.failed(e),
        Some(Event::DiscoveryComplete {
            phase: Phase::Descriptors,
            status: Err(e),
        })
    );
    let a = Action::ReadMultiple(SmallVec::from_slice(&[h(1), h(2)]));
    assert_eq!(a.failed(e), Some(Event::ReadComplete(Err(e))));
    let a = Action::SdpSearch {
        peer: PEER,
        uuid: Uuid16::ATT.as_uuid(),
        attrs: GATT_SEARCH_ATTRS,
    };
    assert_eq!(a.failed(e), Some(Event::SdpComplete(Err(e))));
    assert_eq!(Action::Complete(Ok(())).failed(e), None);
}
