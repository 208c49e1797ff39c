use serde::Serialize;
use std::fmt;

/// Lifecycle of the single forwarding session driven by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(label)
    }
}

/// Form fields in the order they are rendered and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    LocalAddress,
    LocalPort,
    RemoteAddress,
    RemotePort,
    User,
    Password,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::LocalAddress,
        Field::LocalPort,
        Field::RemoteAddress,
        Field::RemotePort,
        Field::User,
        Field::Password,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::LocalAddress => "Local IP",
            Field::LocalPort => "Local Port",
            Field::RemoteAddress => "Remote IP",
            Field::RemotePort => "Remote Port",
            Field::User => "User",
            Field::Password => "Password",
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Field::LocalAddress | Field::RemoteAddress => "ip",
            Field::LocalPort => "5678",
            Field::RemotePort => "22",
            Field::User => "root",
            Field::Password => "password",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, Field::Password)
    }

    pub fn next(self) -> Field {
        let idx = Field::ALL.iter().position(|f| *f == self).unwrap_or(0);
        Field::ALL[(idx + 1) % Field::ALL.len()]
    }

    pub fn prev(self) -> Field {
        let idx = Field::ALL.iter().position(|f| *f == self).unwrap_or(0);
        Field::ALL[(idx + Field::ALL.len() - 1) % Field::ALL.len()]
    }
}

/// Raw operator input, exactly as typed into the form.
///
/// Ports are kept as text so out-of-range or non-numeric input can be
/// reported by the validation gate instead of being lost at edit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub local_address: String,
    pub local_port: String,
    pub remote_address: String,
    pub remote_port: String,
    pub user: String,
    pub password: String,
}

impl Default for SessionDraft {
    fn default() -> Self {
        SessionDraft {
            local_address: "127.0.0.1".to_string(),
            local_port: "5678".to_string(),
            remote_address: "".to_string(),
            remote_port: "22".to_string(),
            user: "".to_string(),
            password: "".to_string(),
        }
    }
}

impl SessionDraft {
    pub fn value(&self, field: Field) -> &str {
        match field {
            Field::LocalAddress => &self.local_address,
            Field::LocalPort => &self.local_port,
            Field::RemoteAddress => &self.remote_address,
            Field::RemotePort => &self.remote_port,
            Field::User => &self.user,
            Field::Password => &self.password,
        }
    }

    pub fn value_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::LocalAddress => &mut self.local_address,
            Field::LocalPort => &mut self.local_port,
            Field::RemoteAddress => &mut self.remote_address,
            Field::RemotePort => &mut self.remote_port,
            Field::User => &mut self.user,
            Field::Password => &mut self.password,
        }
    }
}

/// Validated snapshot handed to the backend at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    pub user: String,
    pub password: String,
}

impl SessionConfig {
    /// `local -> user@remote`, without the password.
    pub fn describe(&self) -> String {
        format!(
            "{}:{} -> {}@{}:{}",
            self.local_address, self.local_port, self.user, self.remote_address, self.remote_port
        )
    }
}
