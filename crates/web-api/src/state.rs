use std::sync::Arc;

use application::{ControlHandler, EventDispatcher, MembershipRegistry, RoomRouter};
use config::RealtimeConfig;
use domain::{TaskRepository, UserDirectory};

use crate::auth::{IdentityGate, JwtService};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MembershipRegistry>,
    pub router: RoomRouter,
    pub dispatcher: Arc<EventDispatcher>,
    pub control: ControlHandler,
    pub identity: IdentityGate,
    pub realtime: Arc<RealtimeConfig>,
}

impl AppState {
    pub fn new(
        registry: Arc<MembershipRegistry>,
        dispatcher: Arc<EventDispatcher>,
        jwt_service: Arc<JwtService>,
        users: Arc<dyn UserDirectory>,
        tasks: Arc<dyn TaskRepository>,
        realtime: RealtimeConfig,
    ) -> Self {
        let router = RoomRouter::new(Arc::clone(&registry));
        Self {
            control: ControlHandler::new(router.clone(), tasks),
            identity: IdentityGate::new(jwt_service, users),
            registry,
            router,
            dispatcher,
            realtime: Arc::new(realtime),
        }
    }
}
