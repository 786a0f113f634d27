//! Channel manager: named multi-participant routes owned by a
//! subsystem (§3 Channel, §4.5 Channel manager).

use dashmap::DashMap;

use mycelia_core::Pkr;

use crate::error::KernelError;

const RESERVED_LOCAL_NAMES: &[&str] = &["", "channel"];

#[derive(Clone)]
pub struct ChannelRecord {
    pub route: String,
    pub participants: Vec<Pkr>,
    pub metadata: Option<serde_json::Value>,
}

/// Creates and destroys channels, each keyed by its full
/// `<owner>://channel/<localName>` route.
pub struct ChannelManager {
    channels: DashMap<String, ChannelRecord>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        ChannelManager {
            channels: DashMap::new(),
        }
    }

    /// Creates a channel rooted at `owner_subsystem`, returning its
    /// route. Rejects empty and reserved local names.
    pub fn create_channel(
        &self,
        owner_subsystem: &str,
        local_name: &str,
        participants: Vec<Pkr>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, KernelError> {
        if RESERVED_LOCAL_NAMES.contains(&local_name) {
            return Err(KernelError::InvalidChannelName {
                name: local_name.to_string(),
            });
        }
        let route = format!("{owner_subsystem}://channel/{local_name}");
        self.channels.insert(
            route.clone(),
            ChannelRecord {
                route: route.clone(),
                participants,
                metadata,
            },
        );
        Ok(route)
    }

    pub fn destroy_channel(&self, route: &str) -> Result<(), KernelError> {
        self.channels
            .remove(route)
            .map(|_| ())
            .ok_or_else(|| KernelError::UnknownSubsystem {
                name: route.to_string(),
            })
    }

    pub fn get(&self, route: &str) -> Option<ChannelRecord> {
        self.channels.get(route).map(|r| r.clone())
    }

    pub fn is_channel_route(&self, route: &str) -> bool {
        self.channels.contains_key(route)
    }
}
