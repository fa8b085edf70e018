use crate::gap::{Characteristic as Char, Descriptor as Desc, Service as Svc, Uuid16};

use super::*;

fn h(v: u16) -> Handle {
    Handle::new(v).unwrap()
}

fn r(start: u16, end: u16) -> HandleRange {
    HandleRange::try_new(start, end).unwrap()
}

fn u(v: u16) -> Uuid {
    Uuid16::new(v).unwrap().as_uuid()
}

/// Item delivered by a discovery procedure.
#[derive(Clone, Copy, Debug)]
enum Item {
    Srv(u16, u16, Uuid, bool),
    Inc(u16, Uuid, u16, u16),
    Chr(u16, u16, Uuid, Prop),
    Dsc(u16, Uuid),
}

/// Example database from [Vol 3] Part G, Appendix B.
fn appendix_b() -> Vec<Item> {
    use Item::*;
    let props = Prop::READ | Prop::INDICATE | Prop::EXT_PROPS;
    vec![
        Srv(0x0001, 0x0005, Svc::GenericAccess.uuid(), true),
        Chr(0x0002, 0x0003, Char::DeviceName.uuid(), Prop::READ | Prop::WRITE),
        Chr(0x0004, 0x0005, Char::Appearance.uuid(), Prop::READ),
        Srv(0x0006, 0x000D, Svc::GenericAttribute.uuid(), true),
        Chr(0x0007, 0x0008, Char::ServiceChanged.uuid(), Prop::INDICATE),
        Dsc(0x0009, Desc::ClientCharacteristicConfiguration.uuid()),
        Chr(0x000A, 0x000B, Char::ClientSupportedFeatures.uuid(), Prop::READ | Prop::WRITE),
        Chr(0x000C, 0x000D, Char::DatabaseHash.uuid(), Prop::READ),
        Srv(0x000E, 0x0013, Svc::Glucose.uuid(), true),
        Inc(0x000F, Svc::Battery.uuid(), 0x0014, 0x0016),
        Chr(0x0010, 0x0011, Char::GlucoseMeasurement.uuid(), props),
        Dsc(0x0012, Desc::ClientCharacteristicConfiguration.uuid()),
        Dsc(0x0013, Desc::CharacteristicExtendedProperties.uuid()),
        Chr(0x0015, 0x0016, Char::BatteryLevel.uuid(), Prop::READ),
    ]
}

fn build(items: impl IntoIterator<Item = Item>) -> Database {
    builder(items).build()
}

fn builder(items: impl IntoIterator<Item = Item>) -> DatabaseBuilder {
    let mut b = DatabaseBuilder::new();
    for it in items {
        match it {
            Item::Srv(s, e, uuid, pri) => b.add_service(h(s), h(e), uuid, pri).unwrap(),
            Item::Inc(hdl, uuid, s, e) => b.add_included_service(h(hdl), uuid, h(s), h(e)).unwrap(),
            Item::Chr(d, v, uuid, p) => b.add_characteristic(h(d), h(v), uuid, p).unwrap(),
            Item::Dsc(hdl, uuid) => b.add_descriptor(h(hdl), uuid).unwrap(),
        }
    }
    b
}

#[test]
fn clean_discovery() {
    use Item::*;
    let db = build([
        Srv(1, 5, u(0x180A), true),
        Chr(2, 3, u(0x2A29), Prop::READ),
        Srv(6, 10, u(0x180F), true),
        Chr(7, 8, u(0x2A19), Prop::READ | Prop::NOTIFY),
    ]);
    assert!(!db.is_empty());
    assert_eq!(db.services().len(), 2);
    assert_eq!(db.services()[0].range(), r(1, 5));
    assert_eq!(db.services()[1].range(), r(6, 10));

    let v = db.view(r(1, 10));
    assert_eq!(v.len(), 4);
    assert!(matches!(v[0], Element::Service { is_primary: true, .. }));
    assert_eq!(v[1].handle(), h(3));
    assert_eq!(v[2].uuid(), u(0x180F));
    assert!(matches!(
        v[3],
        Element::Characteristic { declaration_handle, .. } if declaration_handle == h(7)
    ));
}

#[test]
fn hash_order_independent() {
    let items = appendix_b();
    let a = build(items.iter().copied());
    let svc = items.iter().rev().filter(|it| matches!(it, Item::Srv(..)));
    let inc = items.iter().filter(|it| matches!(it, Item::Inc(..)));
    let chr = items.iter().rev().filter(|it| matches!(it, Item::Chr(..)));
    let dsc = items.iter().rev().filter(|it| matches!(it, Item::Dsc(..)));
    let b = build(svc.chain(inc).chain(chr).chain(dsc).copied());
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_ne!(a.hash(), Database::default().hash());
}

/// Example database hash ([Vol 3] Part G, Appendix B).
#[test]
fn hash() {
    assert_eq!(
        build(appendix_b()).hash(),
        0xF1_CA_2D_48_EC_F5_8B_AC_8A_88_30_BB_B9_FB_A9_90
    );
}

#[test]
fn hash_ext_props_value() {
    let mut b = builder(appendix_b());
    let unread = b.clone().build().hash();
    assert!(b.set_value_of_descriptors(&[0]));
    assert_eq!(b.clone().build().hash(), unread);

    let mut b = builder(appendix_b());
    assert!(b.set_value_of_descriptors(&[ExtProp::RELIABLE_WRITE.bits()]));
    let db = b.build();
    assert_ne!(db.hash(), unread);
    assert_eq!(db.descriptor(h(0x0013)).unwrap().ext_props, Some(ExtProp::RELIABLE_WRITE));
}

#[test]
fn hash_depends_on_structure() {
    let a = build(appendix_b());
    let b = build(appendix_b().into_iter().filter(|it| !matches!(it, Item::Dsc(0x0009, _))));
    let c = build(appendix_b().into_iter().map(|it| match it {
        Item::Chr(0x0004, v, uuid, _) => Item::Chr(0x0004, v, uuid, Prop::READ | Prop::WRITE),
        it => it,
    }));
    assert_ne!(a.hash(), b.hash());
    assert_ne!(a.hash(), c.hash());
}

#[test]
fn secondary_service() {
    let db = build(appendix_b());
    let s = db.services();
    assert_eq!(s.len(), 4);
    assert!(!s[3].is_primary);
    assert_eq!(s[3].range(), r(0x0014, 0x0016));
    assert_eq!(s[3].uuid, Svc::Battery);
    assert_eq!(s[2].included_services[0].range(), s[3].range());
}

#[test]
fn lookups() {
    let db = build(appendix_b());
    assert_eq!(db.find_service(h(0x0001)).unwrap().uuid, Svc::GenericAccess);
    assert_eq!(db.find_service(h(0x000D)).unwrap().uuid, Svc::GenericAttribute);
    assert_eq!(db.find_service(h(0x0015)).unwrap().uuid, Svc::Battery);
    assert!(db.find_service(h(0x0017)).is_none());

    assert_eq!(db.characteristic(h(0x0008)).unwrap().uuid, Char::ServiceChanged);
    assert!(db.characteristic(h(0x0007)).is_none());

    let d = db.descriptor(h(0x0009)).unwrap();
    assert_eq!(d.uuid, Desc::ClientCharacteristicConfiguration);
    assert!(db.descriptor(h(0x0008)).is_none());

    let c = db.owning_characteristic(h(0x0013)).unwrap();
    assert_eq!(c.uuid, Char::GlucoseMeasurement);
    assert_eq!(
        db.owning_characteristic(h(0x0011)).unwrap().uuid,
        Char::GlucoseMeasurement
    );
    assert!(db.owning_characteristic(h(0x000F)).is_none());
    assert!(db.owning_characteristic(h(0x0010)).is_none());

    assert!(db.has_database_hash());
    let db = build(appendix_b().into_iter().filter(|it| !matches!(it, Item::Chr(0x000C, ..))));
    assert!(!db.has_database_hash());
}

#[test]
fn view_range() {
    let db = build(appendix_b());
    assert!(db.view(r(0x0017, 0xFFFF)).is_empty());

    // Partially covered service is returned in full
    let v = db.view(r(0x0010, 0x0010));
    let hdls: Vec<_> = v.iter().map(Element::handle).collect();
    assert_eq!(hdls, [h(0x000E), h(0x000F), h(0x0011), h(0x0012), h(0x0013)]);
    assert!(matches!(v[1], Element::IncludedService { uuid, .. } if uuid == Svc::Battery));

    assert_eq!(db.view(HandleRange::ALL).len(), 4 + 1 + 7 + 3);
}

#[test]
fn search() {
    let db = build(appendix_b());
    assert_eq!(db.search(None).count(), 4);
    let v: Vec<_> = db.search(Some(Svc::Glucose.uuid())).collect();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].handle, h(0x000E));
    assert_eq!(db.search(Some(u(0x1812))).count(), 0);
}

#[test]
fn serde() {
    let db = build(appendix_b());
    let s = serde_json::to_string(&db).unwrap();
    let v: Database = serde_json::from_str(&s).unwrap();
    assert_eq!(v, db);
    assert_eq!(v.hash(), db.hash());
}

#[test]
fn serde_invalid() {
    let db = build(appendix_b());
    let v = serde_json::to_value(&db).unwrap();
    let bad = |f: fn(&mut serde_json::Value)| {
        let mut v = v.clone();
        f(&mut v);
        serde_json::from_value::<Database>(v)
    };
    assert_eq!(bad(|_| {}).unwrap(), db);
    // Service end before start
    assert!(bad(|v| v["services"][0]["handle"] = 9.into()).is_err());
    // Overlapping services
    assert!(bad(|v| v["services"][1]["handle"] = 5.into()).is_err());
    // Duplicate service
    assert!(bad(|v| v["services"][1] = v["services"][0].clone()).is_err());
    // Characteristic value outside of its service
    assert!(bad(|v| v["services"][0]["characteristics"][1]["value_handle"] = 6.into()).is_err());
    // Descriptor before the first characteristic
    assert!(bad(|v| v["services"][2]["characteristics"][0]["descriptors"][0]["handle"] = 15.into()).is_err());

    // Unsorted input is normalized
    let mut v = v.clone();
    v["services"].as_array_mut().unwrap().reverse();
    assert_eq!(serde_json::from_value::<Database>(v).unwrap(), db);
}

#[test]
fn display() {
    let db = build(appendix_b());
    let s = db.to_string();
    assert!(s.starts_with("[0x0001] GenericAccess <"));
    assert!(s.contains("[0x0014] (Secondary) Battery <"));
    assert!(s.contains("|__ [Include 0x0014..=0x0016"));
    assert_eq!(s.lines().count(), 4 + 1 + 7 * 2 + 3);
    db.dump();
}
