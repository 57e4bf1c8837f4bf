use crate::dashboard::Dashboard;
use crate::notify::BroadcastNotifier;

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Dashboard,
    /// Same sink the dashboard notifies through, kept for polling clients.
    pub notifications: BroadcastNotifier,
}
