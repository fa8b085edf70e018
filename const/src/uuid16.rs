// Subset of [Assigned Numbers] Section 3 used by GATT client discovery.

impl Uuid16 {
    /// Attribute Protocol ([Assigned Numbers] Section 3.1).
    pub const ATT: Self = uuid16(0x0007);
    /// Logical Link Control and Adaptation Protocol
    /// ([Assigned Numbers] Section 3.1).
    pub const L2CAP: Self = uuid16(0x0100);
}

uuid16_enum! {
    /// Service class identifiers ([Assigned Numbers] Section 3.3).
    pub enum ServiceClass {
        ServiceDiscoveryServer = 0x1000,
        BrowseGroupDescriptor = 0x1001,
        PublicBrowseRoot = 0x1002,
        SerialPort = 0x1101,
        AudioSource = 0x110A,
        AudioSink = 0x110B,
        Headset = 0x1108,
        Handsfree = 0x111E,
        HumanInterfaceDeviceService = 0x1124,
        PnpInformation = 0x1200,
    }
}

uuid16_enum! {
    /// GATT services ([Assigned Numbers] Section 3.4).
    pub enum Service {
        GenericAccess = 0x1800,
        GenericAttribute = 0x1801,
        ImmediateAlert = 0x1802,
        LinkLoss = 0x1803,
        TxPower = 0x1804,
        CurrentTime = 0x1805,
        Glucose = 0x1808,
        HealthThermometer = 0x1809,
        DeviceInformation = 0x180A,
        HeartRate = 0x180D,
        Battery = 0x180F,
        BloodPressure = 0x1810,
        HumanInterfaceDevice = 0x1812,
        ScanParameters = 0x1813,
        CyclingSpeedAndCadence = 0x1816,
    }
}

uuid16_enum! {
    /// Attribute types ([Assigned Numbers] Section 3.6).
    pub enum Declaration {
        PrimaryService = 0x2800,
        SecondaryService = 0x2801,
        Include = 0x2802,
        Characteristic = 0x2803,
    }
}

uuid16_enum! {
    /// Characteristic descriptors ([Assigned Numbers] Section 3.7).
    pub enum Descriptor {
        CharacteristicExtendedProperties = 0x2900,
        CharacteristicUserDescription = 0x2901,
        ClientCharacteristicConfiguration = 0x2902,
        ServerCharacteristicConfiguration = 0x2903,
        CharacteristicPresentationFormat = 0x2904,
        CharacteristicAggregateFormat = 0x2905,
        ValidRange = 0x2906,
        ExternalReportReference = 0x2907,
        ReportReference = 0x2908,
    }
}

uuid16_enum! {
    /// Characteristics ([Assigned Numbers] Section 3.8).
    pub enum Characteristic {
        DeviceName = 0x2A00,
        Appearance = 0x2A01,
        PeripheralPreferredConnectionParameters = 0x2A04,
        ServiceChanged = 0x2A05,
        AlertLevel = 0x2A06,
        TxPowerLevel = 0x2A07,
        GlucoseMeasurement = 0x2A18,
        BatteryLevel = 0x2A19,
        ModelNumberString = 0x2A24,
        SerialNumberString = 0x2A25,
        FirmwareRevisionString = 0x2A26,
        ManufacturerNameString = 0x2A29,
        PnpId = 0x2A50,
        HeartRateMeasurement = 0x2A37,
        BodySensorLocation = 0x2A38,
        Report = 0x2A4D,
        ReportMap = 0x2A4B,
        HidInformation = 0x2A4A,
        HidControlPoint = 0x2A4C,
        CentralAddressResolution = 0x2AA6,
        ResolvablePrivateAddressOnly = 0x2AC9,
        ClientSupportedFeatures = 0x2B29,
        DatabaseHash = 0x2B2A,
        ServerSupportedFeatures = 0x2B3A,
    }
}
