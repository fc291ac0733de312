mod app_core;
mod login;
mod user_action;

pub use app_core::AppCore;
pub use login::{LoginDispatcher, LoginPorts, LoginRequest, StatusReporter};
pub use user_action::{UserActionGate, UserActionWaiter};
