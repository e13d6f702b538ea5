//! Virtual device state machine.
//!
//! ```text
//! Unconfigured -> EndpointsSet -> TypesSet -> PluggedIn <-> Unplugged -> Closed
//! ```
//!
//! A transition is checked before the control request is issued and applied
//! only after the driver accepted it, so a failed request leaves the state
//! untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of one virtual device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Created or attached, nothing configured yet
    #[default]
    Unconfigured,
    /// Endpoint addresses configured
    EndpointsSet,
    /// Endpoint types configured
    TypesSet,
    /// Visible to the host OS
    PluggedIn,
    /// Detached from the host OS, configuration retained
    Unplugged,
    /// Events released; every further call fails
    Closed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::EndpointsSet => "endpoints-set",
            Self::TypesSet => "types-set",
            Self::PluggedIn => "plugged-in",
            Self::Unplugged => "unplugged",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An operation that moves a device through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    ConfigureEndpoints,
    ConfigureEndpointTypes,
    PlugIn,
    Unplug,
    SubmitAudio,
    Close,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigureEndpoints => "configure endpoints",
            Self::ConfigureEndpointTypes => "configure endpoint types",
            Self::PlugIn => "plug in",
            Self::Unplug => "unplug",
            Self::SubmitAudio => "submit audio",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

impl DeviceState {
    /// State reached by applying `transition`, or an error if the transition
    /// is not allowed from here.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] when the device is closed, when
    /// endpoint types are configured before endpoints, when plugging in
    /// without configured endpoints, when reconfiguring a plugged-in device,
    /// or when submitting audio to a device that is not plugged in.
    pub fn next(self, transition: Transition) -> Result<Self> {
        use DeviceState::{Closed, EndpointsSet, PluggedIn, TypesSet, Unconfigured, Unplugged};
        use Transition::{ConfigureEndpointTypes, ConfigureEndpoints, PlugIn, SubmitAudio, Unplug};

        let next = match (self, transition) {
            (_, Transition::Close) => Some(Closed),
            (Closed, _) => None,

            (Unconfigured | EndpointsSet | TypesSet | Unplugged, ConfigureEndpoints) => Some(EndpointsSet),
            (EndpointsSet | TypesSet | Unplugged, ConfigureEndpointTypes) => Some(TypesSet),
            (EndpointsSet | TypesSet | Unplugged | PluggedIn, PlugIn) => Some(PluggedIn),
            (PluggedIn | Unplugged, Unplug) => Some(Unplugged),
            // Unplugging before the first plug-in is forwarded to the driver
            // but leaves the local configuration progress as it was.
            (Unconfigured | EndpointsSet | TypesSet, Unplug) => Some(self),
            (PluggedIn, SubmitAudio) => Some(PluggedIn),

            _ => None,
        };

        next.ok_or(Error::InvalidTransition { state: self, transition })
    }

    /// Whether the device is visible to the host.
    #[must_use]
    pub fn is_plugged_in(self) -> bool {
        self == Self::PluggedIn
    }

    /// Whether the device has been closed.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn walk(transitions: &[Transition]) -> Result<DeviceState> {
        transitions.iter().try_fold(DeviceState::default(), |state, t| state.next(*t))
    }

    #[test]
    fn test_full_lifecycle() {
        let state = walk(&[
            Transition::ConfigureEndpoints,
            Transition::ConfigureEndpointTypes,
            Transition::PlugIn,
            Transition::SubmitAudio,
            Transition::Unplug,
            Transition::Close,
        ]);
        assert_eq!(state, Ok(DeviceState::Closed));
    }

    #[test]
    fn test_plug_round_trip_returns_to_plugged_in() {
        let state = walk(&[
            Transition::ConfigureEndpoints,
            Transition::ConfigureEndpointTypes,
            Transition::PlugIn,
            Transition::Unplug,
            Transition::PlugIn,
        ]);
        assert_eq!(state, Ok(DeviceState::PluggedIn));
    }

    #[test]
    fn test_plug_in_requires_endpoints() {
        assert_matches!(
            DeviceState::Unconfigured.next(Transition::PlugIn),
            Err(Error::InvalidTransition { state: DeviceState::Unconfigured, transition: Transition::PlugIn })
        );
        assert_eq!(DeviceState::EndpointsSet.next(Transition::PlugIn), Ok(DeviceState::PluggedIn));
    }

    #[test]
    fn test_types_require_endpoints() {
        assert!(DeviceState::Unconfigured.next(Transition::ConfigureEndpointTypes).is_err());
    }

    #[test]
    fn test_no_reconfiguration_while_plugged_in() {
        assert!(DeviceState::PluggedIn.next(Transition::ConfigureEndpoints).is_err());
        assert!(DeviceState::PluggedIn.next(Transition::ConfigureEndpointTypes).is_err());
    }

    #[test]
    fn test_submit_only_when_plugged_in() {
        assert!(DeviceState::TypesSet.next(Transition::SubmitAudio).is_err());
        assert!(DeviceState::Unplugged.next(Transition::SubmitAudio).is_err());
    }

    #[test]
    fn test_early_unplug_keeps_progress() {
        assert_eq!(DeviceState::TypesSet.next(Transition::Unplug), Ok(DeviceState::TypesSet));
    }

    #[test]
    fn test_closed_rejects_everything_but_close() {
        let closed = DeviceState::Closed;
        for t in [
            Transition::ConfigureEndpoints,
            Transition::ConfigureEndpointTypes,
            Transition::PlugIn,
            Transition::Unplug,
            Transition::SubmitAudio,
        ] {
            assert!(closed.next(t).is_err(), "{t} should fail on a closed device");
        }
        assert_eq!(closed.next(Transition::Close), Ok(DeviceState::Closed));
    }
}
