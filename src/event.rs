// live-sessions-service/src/event.rs
//! Typed view of one switch notification.
//!
//! The event socket hands us a flat, already decoded header map.
//! Normalization never fails: a missing header becomes an empty string or
//! `None`, never an error.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub type Headers = HashMap<String, String>;

/// Header names the normalizer reads.
mod header {
    pub const EVENT_NAME: &str = "Event-Name";
    pub const EVENT_SUBCLASS: &str = "Event-Subclass";
    pub const UNIQUE_ID: &str = "Unique-ID";
    pub const SIGNAL_BOND: &str = "variable_signal_bond";
    pub const OTHER_LEG_UNIQUE_ID: &str = "Other-Leg-Unique-ID";
    pub const CALLER_NUMBER: &str = "Caller-Caller-ID-Number";
    pub const ORIG_CALLER_NUMBER: &str = "Caller-Orig-Caller-ID-Number";
    pub const CALLER_NAME: &str = "Caller-Caller-ID-Name";
    pub const CALLEE_NUMBER: &str = "Caller-Callee-ID-Number";
    pub const CALLEE_NAME: &str = "Caller-Callee-ID-Name";
    pub const DESTINATION_NUMBER: &str = "Caller-Destination-Number";
    pub const CALL_STATE: &str = "Channel-Call-State";
    pub const CALL_DIRECTION: &str = "Call-Direction";
    pub const PRESENCE_DIRECTION: &str = "Presence-Call-Direction";
    pub const HANGUP_CAUSE: &str = "Hangup-Cause";
    pub const OTHER_TYPE: &str = "Other-Type";
    pub const CREATED_TIME: &str = "Caller-Channel-Created-Time";
    pub const ANSWERED_TIME: &str = "Caller-Channel-Answered-Time";
    pub const PROGRESS_TIME: &str = "Caller-Channel-Progress-Time";
    pub const HANGUP_TIME: &str = "Caller-Channel-Hangup-Time";
    pub const TRANSFER_TIME: &str = "Caller-Channel-Transfer-Time";
    pub const BRIDGED_TIME: &str = "Caller-Channel-Bridged-Time";
    pub const LAST_HOLD_TIME: &str = "Caller-Channel-Last-Hold";
    pub const EVENT_DATE: &str = "Event-Date-Timestamp";
    pub const START_TIME: &str = "variable__START_TIME";
    pub const API_COMMAND: &str = "API-Command";
    pub const API_COMMAND_ARGUMENT: &str = "API-Command-Argument";
    pub const RECORD_FILE_PATH: &str = "Record-File-Path";
    pub const EFFECTIVE_CALLEE_NUMBER: &str = "variable_effective_callee_id_number";
    pub const SIP_CALLEE_NAME: &str = "variable_sip_callee_id_name";
    pub const OTHER_LEG_CALLEE_NAME: &str = "Other-Leg-Callee-ID-Name";
    pub const ORIGINAL_CALLER: &str = "variable_original_caller";
    pub const ORIGINAL_CALLEE: &str = "variable_original_callee";
    pub const CALLER_TYPE: &str = "variable_CALLER_TYPE";
    pub const CALLEE_TYPE: &str = "variable_CALLEE_TYPE";
    pub const CALL_DIRECTION_VAR: &str = "variable_CALL_DIRECTION";
    pub const CALL_TYPE: &str = "variable_CALL_TYPE";
    pub const ORIGINATION_CALLER_NAME: &str = "variable_origination_caller_id_name";
    pub const ORIGINATION_CALLEE_NAME: &str = "variable_origination_callee_id_name";
    pub const EFFECTIVE_CALLER_NAME: &str = "variable_effective_caller_id_name";
    pub const EFFECTIVE_CALLEE_NAME: &str = "variable_effective_callee_id_name";
}

pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ChannelCreate,
    ChannelProgress,
    ChannelBridge,
    ChannelUnbridge,
    ChannelDestroy,
    ChannelHold,
    ChannelUnhold,
    ChannelPark,
    ChannelUnpark,
    RecordStart,
    PlaybackStart,
    Api,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "CHANNEL_CREATE" => EventKind::ChannelCreate,
            "CHANNEL_PROGRESS" => EventKind::ChannelProgress,
            "CHANNEL_BRIDGE" => EventKind::ChannelBridge,
            "CHANNEL_UNBRIDGE" => EventKind::ChannelUnbridge,
            "CHANNEL_DESTROY" => EventKind::ChannelDestroy,
            "CHANNEL_HOLD" => EventKind::ChannelHold,
            "CHANNEL_UNHOLD" => EventKind::ChannelUnhold,
            "CHANNEL_PARK" => EventKind::ChannelPark,
            "CHANNEL_UNPARK" => EventKind::ChannelUnpark,
            "RECORD_START" => EventKind::RecordStart,
            "PLAYBACK_START" => EventKind::PlaybackStart,
            "API" => EventKind::Api,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ChannelCreate => "CHANNEL_CREATE",
            EventKind::ChannelProgress => "CHANNEL_PROGRESS",
            EventKind::ChannelBridge => "CHANNEL_BRIDGE",
            EventKind::ChannelUnbridge => "CHANNEL_UNBRIDGE",
            EventKind::ChannelDestroy => "CHANNEL_DESTROY",
            EventKind::ChannelHold => "CHANNEL_HOLD",
            EventKind::ChannelUnhold => "CHANNEL_UNHOLD",
            EventKind::ChannelPark => "CHANNEL_PARK",
            EventKind::ChannelUnpark => "CHANNEL_UNPARK",
            EventKind::RecordStart => "RECORD_START",
            EventKind::PlaybackStart => "PLAYBACK_START",
            EventKind::Api => "API",
            EventKind::Other(name) => name,
        }
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Other(String::new())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the call the reporting leg is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LegRole {
    #[default]
    Caller,
    Callee,
}

/// Identity and display overrides carried by channel variables.
///
/// Every handler that finds a session copies these from the event, and
/// `uuid_setvar` API events merge individual keys into them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOverrides {
    pub original_caller_num: String,
    pub original_callee_num: String,
    pub caller_type: String,
    pub callee_type: String,
    pub call_direction: String,
    pub call_type: String,
    pub origination_caller_id_name: String,
    pub origination_callee_id_name: String,
    pub effective_caller_id_name: String,
    pub effective_callee_id_name: String,
    pub other_leg_callee_id_name: String,
}

impl CallOverrides {
    fn from_headers(headers: &Headers) -> Self {
        Self {
            original_caller_num: field(headers, header::ORIGINAL_CALLER),
            original_callee_num: field(headers, header::ORIGINAL_CALLEE),
            caller_type: field(headers, header::CALLER_TYPE),
            callee_type: field(headers, header::CALLEE_TYPE),
            call_direction: field(headers, header::CALL_DIRECTION_VAR),
            call_type: field(headers, header::CALL_TYPE),
            origination_caller_id_name: field(headers, header::ORIGINATION_CALLER_NAME),
            origination_callee_id_name: field(headers, header::ORIGINATION_CALLEE_NAME),
            effective_caller_id_name: field(headers, header::EFFECTIVE_CALLER_NAME),
            effective_callee_id_name: field(headers, header::EFFECTIVE_CALLEE_NAME),
            other_leg_callee_id_name: field(headers, header::OTHER_LEG_CALLEE_NAME),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Event {
    pub kind: EventKind,
    pub subclass: String,
    pub unique_id: String,
    pub other_id: String,
    /// Name of the switch that delivered the event.
    pub pole: String,
    pub caller_number: String,
    pub callee_number: String,
    pub caller_name: String,
    pub callee_name: String,
    pub original_caller: String,
    pub effective_callee_number: String,
    pub sip_callee_id_name: String,
    pub call_state: String,
    pub fs_direction: String,
    pub leg_role: LegRole,
    pub hangup_cause: String,
    pub other_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub progress_at: Option<DateTime<Utc>>,
    pub hangup_at: Option<DateTime<Utc>>,
    pub transferred_at: Option<DateTime<Utc>>,
    pub bridged_at: Option<DateTime<Utc>>,
    pub last_hold_at: Option<DateTime<Utc>>,
    pub event_date: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub record_file_path: String,
    pub api_command: String,
    pub api_command_argument: String,
    /// Leg targeted by a `uuid_setvar`/`uuid_setvar_multi` command.
    pub api_target: String,
    /// Variables carried by a `uuid_setvar`/`uuid_setvar_multi` command.
    pub api_vars: HashMap<String, String>,
    pub overrides: CallOverrides,
}

impl Event {
    pub fn from_headers(headers: &Headers) -> Self {
        // The signal bond wins over the explicit other-leg header.
        let other_id = match headers.get(header::SIGNAL_BOND) {
            Some(bond) if !bond.is_empty() => bond.clone(),
            _ => field(headers, header::OTHER_LEG_UNIQUE_ID),
        };

        let raw_caller = field(headers, header::CALLER_NUMBER);
        let original_caller = field(headers, header::ORIG_CALLER_NUMBER);
        let caller_number = if !raw_caller.is_empty() && raw_caller != ANONYMOUS {
            raw_caller
        } else if !original_caller.is_empty() {
            original_caller.clone()
        } else {
            ANONYMOUS.to_string()
        };

        let callee_number = match headers.get(header::CALLEE_NUMBER) {
            Some(num) if !num.is_empty() => num.clone(),
            _ => field(headers, header::DESTINATION_NUMBER),
        };

        let leg_role = match headers.get(header::PRESENCE_DIRECTION).map(String::as_str) {
            Some("inbound") => LegRole::Callee,
            _ => LegRole::Caller,
        };

        let api_command = field(headers, header::API_COMMAND);
        let api_command_argument = field(headers, header::API_COMMAND_ARGUMENT);
        let (api_target, api_vars) = if is_setvar_command(&api_command) {
            parse_setvar_argument(&api_command_argument)
        } else {
            (String::new(), HashMap::new())
        };

        Self {
            kind: EventKind::parse(&field(headers, header::EVENT_NAME)),
            subclass: field(headers, header::EVENT_SUBCLASS),
            unique_id: field(headers, header::UNIQUE_ID),
            other_id,
            pole: String::new(),
            caller_number,
            callee_number,
            caller_name: field(headers, header::CALLER_NAME),
            callee_name: field(headers, header::CALLEE_NAME),
            original_caller,
            effective_callee_number: field(headers, header::EFFECTIVE_CALLEE_NUMBER),
            sip_callee_id_name: field(headers, header::SIP_CALLEE_NAME),
            call_state: field(headers, header::CALL_STATE),
            fs_direction: field(headers, header::CALL_DIRECTION),
            leg_role,
            hangup_cause: field(headers, header::HANGUP_CAUSE),
            other_type: field(headers, header::OTHER_TYPE),
            created_at: micros_header(headers, header::CREATED_TIME),
            answered_at: micros_header(headers, header::ANSWERED_TIME),
            progress_at: micros_header(headers, header::PROGRESS_TIME),
            hangup_at: micros_header(headers, header::HANGUP_TIME),
            transferred_at: micros_header(headers, header::TRANSFER_TIME),
            bridged_at: micros_header(headers, header::BRIDGED_TIME),
            last_hold_at: micros_header(headers, header::LAST_HOLD_TIME),
            event_date: micros_header(headers, header::EVENT_DATE),
            start_time: headers.get(header::START_TIME).and_then(|raw| seconds_to_time(raw)),
            record_file_path: field(headers, header::RECORD_FILE_PATH),
            api_command,
            api_command_argument,
            api_target,
            api_vars,
            overrides: CallOverrides::from_headers(headers),
        }
    }

    pub fn with_pole(mut self, pole: impl Into<String>) -> Self {
        self.pole = pole.into();
        self
    }

    pub fn is_setvar(&self) -> bool {
        is_setvar_command(&self.api_command)
    }
}

fn field(headers: &Headers, key: &str) -> String {
    headers.get(key).cloned().unwrap_or_default()
}

fn micros_header(headers: &Headers, key: &str) -> Option<DateTime<Utc>> {
    headers.get(key).and_then(|raw| micros_to_time(raw))
}

fn is_setvar_command(command: &str) -> bool {
    command == "uuid_setvar" || command == "uuid_setvar_multi"
}

/// Epoch microseconds to an absolute time. `0` (or garbage) means unset.
pub fn micros_to_time(raw: &str) -> Option<DateTime<Utc>> {
    match raw.trim().parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(micros) => Utc.timestamp_micros(micros).single(),
    }
}

pub fn seconds_to_time(raw: &str) -> Option<DateTime<Utc>> {
    match raw.trim().parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
    }
}

/// Split a `uuid_setvar[_multi]` argument into its target leg and variables.
///
/// `"<uuid> k=v;k2=v2"` and `"<uuid> k v"` are both accepted. An item without
/// a separator maps to an empty value.
pub fn parse_setvar_argument(argument: &str) -> (String, HashMap<String, String>) {
    let target = argument.split(' ').next().unwrap_or_default().to_string();
    let mut vars = HashMap::new();

    for (idx, item) in argument.split(';').enumerate() {
        let item = if idx == 0 {
            match item.strip_prefix(target.as_str()) {
                Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
                None => item,
            }
        } else {
            item
        };
        if item.is_empty() {
            continue;
        }
        let (key, value) = if item.contains('=') {
            item.split_once('=').unwrap_or((item, ""))
        } else {
            item.split_once(' ').unwrap_or((item, ""))
        };
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), value.to_string());
    }

    (target, vars)
}
