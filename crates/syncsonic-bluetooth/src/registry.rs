//! Speaker registry.
//!
//! The source of truth for what the phone sees as "paired speakers".
//! Records survive for the lifetime of the daemon; pairing keys persist in
//! BlueZ's own store, so a restart repopulates this map from scan results
//! and Connect requests.

use std::collections::HashMap;

use tracing::debug;

use syncsonic_core::{Mac, SettingsPatch, SpeakerSettings};

/// Everything known about one classic-Bluetooth speaker.
#[derive(Debug, Clone)]
pub struct SpeakerRecord {
    pub mac: Mac,
    pub name: String,
    pub paired: bool,
    pub trusted: bool,
    /// Last RSSI observed during discovery.
    pub rssi: Option<i16>,
    /// Controller currently holding this speaker, if any.
    pub adapter: Option<String>,
    pub settings: SpeakerSettings,
}

impl SpeakerRecord {
    fn new(mac: Mac) -> Self {
        Self {
            mac,
            name: String::new(),
            paired: false,
            trusted: false,
            rssi: None,
            adapter: None,
            settings: SpeakerSettings::default(),
        }
    }
}

/// Registry of every speaker seen or targeted this session.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    speakers: HashMap<Mac, SpeakerRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a record from discovery or a Connect request.
    /// A `None` name keeps whatever name was already known.
    pub fn upsert(&mut self, mac: Mac, name: Option<&str>, rssi: Option<i16>) {
        let record = self
            .speakers
            .entry(mac)
            .or_insert_with(|| SpeakerRecord::new(mac));
        if let Some(name) = name {
            if !name.is_empty() {
                record.name = name.to_string();
            }
        }
        if rssi.is_some() {
            record.rssi = rssi;
        }
    }

    pub fn mark_paired(&mut self, mac: Mac) {
        if let Some(record) = self.speakers.get_mut(&mac) {
            record.paired = true;
            debug!("{} marked paired", mac);
        }
    }

    pub fn mark_trusted(&mut self, mac: Mac) {
        if let Some(record) = self.speakers.get_mut(&mac) {
            record.trusted = true;
        }
    }

    /// Record which controller holds this speaker (`None` on release).
    pub fn set_adapter(&mut self, mac: Mac, adapter: Option<String>) {
        if let Some(record) = self.speakers.get_mut(&mac) {
            record.adapter = adapter;
        }
    }

    pub fn get(&self, mac: Mac) -> Option<&SpeakerRecord> {
        self.speakers.get(&mac)
    }

    /// Paired speakers as `(mac, name)` pairs, sorted by MAC.
    pub fn paired_list(&self) -> Vec<(Mac, String)> {
        let mut list: Vec<_> = self
            .speakers
            .values()
            .filter(|r| r.paired)
            .map(|r| (r.mac, r.name.clone()))
            .collect();
        list.sort_by_key(|(mac, _)| *mac);
        list
    }

    /// Current settings for a speaker; defaults when the speaker is new.
    pub fn settings(&self, mac: Mac) -> SpeakerSettings {
        self.speakers
            .get(&mac)
            .map(|r| r.settings)
            .unwrap_or_default()
    }

    /// Apply a settings patch. Idempotent, last-write-wins. Returns the
    /// resulting settings.
    pub fn set_settings(&mut self, mac: Mac, patch: SettingsPatch) -> SpeakerSettings {
        let record = self
            .speakers
            .entry(mac)
            .or_insert_with(|| SpeakerRecord::new(mac));
        record.settings = patch.apply(record.settings);
        record.settings
    }
}
