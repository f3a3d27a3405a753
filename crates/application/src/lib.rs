//! 应用层实现。
//!
//! 实时协作层的核心：成员注册表、房间路由、事件分发、在线通知、
//! 存活检查以及客户端控制消息处理。所有组件都是显式构造的实例，
//! 通过 `Arc` 注入到连接处理任务中。

pub mod clock;
pub mod control;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod presence;
pub mod registry;
pub mod router;

pub use clock::{Clock, ManualClock, SystemClock};
pub use control::ControlHandler;
pub use delivery::{
    outbound_queue, DeliveryFailure, DeliveryReport, OutboundEvent, OutboundReceiver, OutboundSender,
};
pub use dispatcher::{EventDispatcher, TaskMutation};
pub use error::ApplicationError;
pub use liveness::LivenessMonitor;
pub use presence::PresenceAnnouncer;
pub use registry::{
    ConnectionTarget, Departure, MembershipRegistry, MembershipSnapshot, PresenceChange,
    PresenceSnapshot,
};
pub use router::RoomRouter;
