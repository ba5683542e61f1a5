//! roughd: roughing pump and gauge control daemon.
//!
//! One-shot commands talk to a device and exit; `monitor` supervises both
//! devices until interrupted or until the supervision loop fails closed.
//!
//! ```bash
//! roughd --config config/roughd.toml pump status
//! roughd gauge status
//! roughd monitor 5
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use roughd::adapters::TcpAdapter;
use roughd::config::{RoughConfig, DEFAULT_CONFIG_PATH};
use roughd::health::{HealthPolicy, MonitorState, SafetyMonitor, StopReason};
use roughd::instrument::pump::DEFAULT_STANDBY_PERCENT;
use roughd::instrument::{GaugeDriver, PumpDriver};
use roughd::observation::{Event, Observation, ObservationSink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roughd", version, about = "Roughing pump and pressure gauge control")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print observations as JSON instead of keyword=value
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Roughing pump commands
    Pump {
        #[command(subcommand)]
        action: PumpAction,
    },
    /// Pressure gauge commands
    Gauge {
        #[command(subcommand)]
        action: GaugeAction,
    },
    /// Supervise pump and gauge every PERIOD seconds (0 = do not monitor)
    Monitor {
        /// Polling period in seconds; defaults to monitor.default_period_secs
        period: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
enum PumpAction {
    /// Model, DSP/PIC versions and full speed
    Ident,
    /// Turn the pump on
    Start,
    /// Turn the pump off
    Stop,
    /// Speed, status word, temperatures and lifetimes
    Status,
    /// Enter standby at PERCENT of full speed
    Standby { percent: Option<i32> },
    /// Leave standby
    StandbyOff,
    /// Send a raw command
    Raw { text: String },
}

#[derive(Subcommand, Debug)]
enum GaugeAction {
    /// Read the pressure
    Status,
    /// Send a raw telegram
    Raw { text: String },
    /// Query a parameter by number
    GetRaw { param: u16 },
    /// Set a parameter by number
    SetRaw { param: u16, value: String },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn print_observations(mut rx: broadcast::Receiver<Observation>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(observation) => {
                if json {
                    match serde_json::to_string(&observation) {
                        Ok(line) => println!("{line}"),
                        Err(e) => eprintln!("cannot encode observation: {e}"),
                    }
                } else {
                    println!("{observation}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("dropped {n} observations");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

struct Daemon {
    config: RoughConfig,
    sink: ObservationSink,
    pump: PumpDriver,
    gauge: GaugeDriver,
}

impl Daemon {
    fn new(config: RoughConfig, sink: ObservationSink) -> Self {
        let pump_link = TcpAdapter::from_config("pump", &config.pump);
        let gauge_link = TcpAdapter::from_config("gauge", &config.gauge.link);
        let pump = PumpDriver::new("pump", Arc::new(pump_link), sink.clone());
        let gauge = GaugeDriver::new(
            "gauge",
            config.gauge.address,
            Arc::new(gauge_link),
            sink.clone(),
        );
        Self {
            config,
            sink,
            pump,
            gauge,
        }
    }

    fn text(text: impl Into<String>) -> Event {
        Event::Text { text: text.into() }
    }

    /// Returns whether the command succeeded.
    async fn run(self, command: Command) -> bool {
        let (source, result) = match command {
            Command::Pump { action } => ("pump", self.pump_command(action).await),
            Command::Gauge { action } => ("gauge", self.gauge_command(action).await),
            Command::Monitor { period } => return self.monitor(period).await,
        };
        match result {
            Ok(event) => {
                self.sink.inform(source, event);
                true
            }
            Err(e) => {
                self.sink.fail(source, Self::text(e.to_string()));
                false
            }
        }
    }

    async fn pump_command(&self, action: PumpAction) -> roughd::error::RoughResult<Event> {
        let event = match action {
            PumpAction::Ident => Event::Ident {
                fields: self.pump.ident().await?,
            },
            PumpAction::Start => Self::text(self.pump.start().await?.join(",")),
            PumpAction::Stop => Self::text(self.pump.stop().await?.join(",")),
            PumpAction::Status => {
                self.pump.status().await?;
                Self::text("status complete")
            }
            PumpAction::Standby { percent } => {
                let percent = percent.unwrap_or(DEFAULT_STANDBY_PERCENT);
                Self::text(self.pump.start_standby(percent).await?.trim())
            }
            PumpAction::StandbyOff => Self::text(self.pump.stop_standby().await?.trim()),
            PumpAction::Raw { text } => {
                Self::text(format!("returned {:?}", self.pump.raw_command(&text).await?))
            }
        };
        Ok(event)
    }

    async fn gauge_command(&self, action: GaugeAction) -> roughd::error::RoughResult<Event> {
        let event = match action {
            GaugeAction::Status => Event::Pressure {
                value: self.gauge.pressure().await?,
            },
            GaugeAction::Raw { text } => {
                Self::text(format!("returned {:?}", self.gauge.raw_command(&text).await?))
            }
            GaugeAction::GetRaw { param } => {
                Self::text(format!("returned {:?}", self.gauge.raw_query(param).await?))
            }
            GaugeAction::SetRaw { param, value } => Self::text(format!(
                "returned {:?}",
                self.gauge.raw_set(param, &value).await?
            )),
        };
        Ok(event)
    }

    async fn monitor(self, period: Option<f64>) -> bool {
        let period = period.unwrap_or(self.config.monitor.default_period_secs);
        let mut monitor = SafetyMonitor::new(
            self.pump.clone(),
            self.gauge.clone(),
            self.sink.clone(),
            HealthPolicy::from(&self.config.monitor),
        );
        let policy = monitor.policy();
        info!(
            pressure_limit = policy.pressure_limit,
            nominal_speed_hz = ?policy.nominal_speed_hz,
            "monitor health policy"
        );

        let state = match monitor.set_period(period).await {
            Ok(state) => state,
            Err(e) => {
                self.sink.fail("monitor", Self::text(e.to_string()));
                return false;
            }
        };
        if !matches!(state, MonitorState::Running { .. }) {
            return state != MonitorState::Stopped(StopReason::Failed);
        }

        let state = tokio::select! {
            state = monitor.wait() => state,
            _ = tokio::signal::ctrl_c() => monitor.stop().await,
        };
        state != MonitorState::Stopped(StopReason::Failed)
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = match RoughConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info", cli.log_json);
            return Err(e).with_context(|| format!("loading {}", cli.config.display()));
        }
    };
    init_tracing(&config.application.log_level, cli.log_json);
    info!(
        name = %config.application.name,
        pump = %format!("{}:{}", config.pump.host, config.pump.port),
        gauge = %format!("{}:{}", config.gauge.link.host, config.gauge.link.port),
        "configuration loaded"
    );

    let sink = ObservationSink::default();
    let printer = tokio::spawn(print_observations(sink.subscribe(), cli.json));

    // Every sink clone lives inside the daemon; dropping it closes the printer.
    let ok = Daemon::new(config, sink).run(cli.command).await;
    printer.await.context("observation printer panicked")?;
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("roughd: {e:#}");
            ExitCode::FAILURE
        }
    }
}
