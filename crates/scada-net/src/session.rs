//! Per-client session state (spec §4.8): `{authenticated, user_name, role_id,
//! activity_time, command_queue, open_file_handle}`.

use std::time::Instant;

use scada_common::Role;

use crate::files::OpenFile;

pub const IDLE_DISCONNECT: std::time::Duration = std::time::Duration::from_secs(60);

pub struct Session {
    pub authenticated: bool,
    pub user_name: String,
    pub user_id: u16,
    /// The field device (`kp_num`) this session's driver polls for (spec
    /// §4.8's "that device's polling driver client"). A driver authenticates
    /// with its KP number as the user name; `0` if the name isn't one.
    pub kp_num: u16,
    pub role: Role,
    pub activity_time: Instant,
    pub open_file: Option<OpenFile>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            user_name: String::new(),
            user_id: 0,
            kp_num: 0,
            role: Role::Disabled,
            activity_time: Instant::now(),
            open_file: None,
        }
    }

    pub fn touch(&mut self) {
        self.activity_time = Instant::now();
    }

    pub fn is_idle(&self) -> bool {
        self.activity_time.elapsed() >= IDLE_DISCONNECT
    }

    pub fn authenticate(&mut self, user_id: u16, name: String, role: Role) {
        self.authenticated = role.is_authenticated();
        self.user_id = user_id;
        self.kp_num = name.parse().unwrap_or(0);
        self.user_name = name;
        self.role = role;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
