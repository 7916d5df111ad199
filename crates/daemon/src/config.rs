//! Command-line configuration.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};
use survey_core::pattern::{SurveyPlanner, DEFAULT_GRID_SPACING_DEG};
use survey_core::validation::validate_ground_speed;

use crate::mission::{MissionSettings, MissionTiming};

/// Which operator channel to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelKind {
    /// Line-delimited JSON on stdin/stdout.
    Stdio,
    /// WebSocket server.
    Ws,
}

#[derive(Parser, Debug)]
#[command(name = "survey-daemon", version, about = "Aerial survey mission engine")]
pub struct Args {
    /// Vehicle endpoint, e.g. sim:// or sim://-35.36,149.16
    #[arg(long, default_value = "sim://-35.363261,149.165230")]
    pub vehicle: String,

    /// Seconds to wait for the vehicle link.
    #[arg(long, default_value_t = 60)]
    pub connect_timeout_secs: u64,

    /// Operator channel.
    #[arg(long, value_enum, default_value_t = ChannelKind::Stdio)]
    pub channel: ChannelKind,

    /// Listen address for the WebSocket channel.
    #[arg(long, default_value = "127.0.0.1:8765")]
    pub listen: SocketAddr,

    /// Survey cruise speed in m/s.
    #[arg(long, default_value_t = 10.0)]
    pub ground_speed: f64,

    /// Survey grid spacing in degrees.
    #[arg(long, default_value_t = DEFAULT_GRID_SPACING_DEG)]
    pub grid_spacing_deg: f64,

    /// Telemetry rate in Hz.
    #[arg(long, default_value_t = 10.0)]
    pub telemetry_hz: f64,

    /// Stop the mission and return to launch when the last client leaves.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub stop_on_disconnect: bool,

    /// Seconds to wait for the vehicle to pass pre-arm checks.
    #[arg(long, default_value_t = 30)]
    pub armable_timeout_secs: u64,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    pub log: String,
}

/// Validated daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub vehicle_endpoint: String,
    pub connect_timeout: Duration,
    pub channel: ChannelKind,
    pub listen: SocketAddr,
    pub telemetry_hz: f64,
    pub stop_on_disconnect: bool,
    /// Events buffered per client before a slow client starts losing them.
    pub outbox_capacity: usize,
    pub mission: MissionSettings,
}

impl DaemonConfig {
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        validate_ground_speed(args.ground_speed).context("invalid --ground-speed")?;
        let planner = SurveyPlanner::new(args.grid_spacing_deg).context("invalid --grid-spacing-deg")?;
        if !args.telemetry_hz.is_finite() || args.telemetry_hz <= 0.0 {
            anyhow::bail!("--telemetry-hz must be positive, got {}", args.telemetry_hz);
        }

        Ok(Self {
            vehicle_endpoint: args.vehicle.clone(),
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            channel: args.channel,
            listen: args.listen,
            telemetry_hz: args.telemetry_hz,
            stop_on_disconnect: args.stop_on_disconnect,
            outbox_capacity: 1024,
            mission: MissionSettings {
                timing: MissionTiming {
                    armable_timeout: Duration::from_secs(args.armable_timeout_secs),
                    ..MissionTiming::default()
                },
                ground_speed: args.ground_speed,
                planner,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let args = Args::parse_from(["survey-daemon"]);
        let config = DaemonConfig::from_args(&args).unwrap();
        assert_eq!(config.channel, ChannelKind::Stdio);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert!(config.stop_on_disconnect);
        assert_eq!(config.mission.ground_speed, 10.0);
        assert_eq!(config.mission.timing.armable_timeout, Duration::from_secs(30));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "survey-daemon",
            "--channel",
            "ws",
            "--listen",
            "0.0.0.0:9000",
            "--stop-on-disconnect",
            "false",
            "--grid-spacing-deg",
            "0.0002",
        ]);
        let config = DaemonConfig::from_args(&args).unwrap();
        assert_eq!(config.channel, ChannelKind::Ws);
        assert_eq!(config.listen.port(), 9000);
        assert!(!config.stop_on_disconnect);
        assert_eq!(config.mission.planner.grid_spacing_deg(), 0.0002);
    }

    #[test]
    fn rejects_nonsense_numbers() {
        for flag in ["--ground-speed=0", "--grid-spacing-deg=-1", "--telemetry-hz=0"] {
            let args = Args::try_parse_from(["survey-daemon", flag]).unwrap();
            assert!(DaemonConfig::from_args(&args).is_err(), "{flag}");
        }
    }

    #[test]
    fn bad_flags_are_errors_not_exits() {
        assert!(Args::try_parse_from(["survey-daemon", "--grid-spacing-deg", "-1"]).is_err());
        assert!(Args::try_parse_from(["survey-daemon", "--channel", "carrier-pigeon"]).is_err());
    }
}
