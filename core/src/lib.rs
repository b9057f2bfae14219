// PairLink — point-to-point session core
#![allow(clippy::empty_line_after_doc_comments)]
//
// "Does this help two nearby devices find each other and hold exactly
//  one reliable link?"
//
// If the answer is no, it doesn't belong here.

pub mod config;
pub mod device;
pub mod lifecycle;
pub mod permissions;
pub mod protocol;
pub mod readiness;
pub mod registry;
pub mod session;

pub use config::PairLinkConfig;
pub use device::{Advertisement, DeviceCache, DeviceCacheConfig, DiscoveredDevice};
pub use lifecycle::{AppPhase, LifecycleAware, LifecycleConfig, LifecycleCoordinator};
pub use permissions::{
    Gatekeeper, Permission, PermissionError, PermissionOracle, PermissionStatus, PlatformTier,
    Role,
};
pub use protocol::frame::{decode, encode, DecodedFrame, FrameCeiling, FrameError, MessageType};
pub use protocol::chunk::{Chunker, Reassembler};
pub use readiness::{
    RadioPowerState, ReadinessError, ReadinessMonitor, StateChange, SystemState,
    SystemStateSource,
};
pub use registry::{
    ReleasableHandle, ResourceId, ResourceKind, ResourceRegistry, ResourceState, RegistryConfig,
    SweepReport,
};
pub use session::{
    AdvertiseSettings, AdvertiseState, AdvertisingEvent, AdvertisingSession, ConnectionEvent,
    ConnectionSlot, ConnectionState, DiscoveryEvent, DiscoverySession, PeerConnection,
    RadioBridge, RadioError, RadioEvent, RadioFailure, ScanMode, ScanPolicy, ScanSettings,
    SearchState, SessionError, SessionId, SessionSnapshot, StartOutcome,
};
