//! Joy-Con Command CLI
//!
//! Connects to a Joy-Con or Pro Controller, loads its calibration and
//! shows the decoded input state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use joycon_cmd::config::DriverConfig;
use joycon_cmd::connection::{DeviceIdentity, Model};
use joycon_cmd::poller::PollState;
use joycon_cmd::report::{ControllerStatus, StickPosition};
use joycon_cmd::JoyCon;

/// Joy-Con driver CLI
#[derive(Parser)]
#[command(name = "joycon-cmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Driver configuration file
    #[arg(short, long, env = "JOYCON_CMD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Left,
    Right,
    Pro,
}

impl From<ModelArg> for Model {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Left => Model::JoyConLeft,
            ModelArg::Right => Model::JoyConRight,
            ModelArg::Pro => Model::ProController,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show controller state in real-time
    Monitor {
        /// Controller model
        #[arg(short, long, value_enum)]
        model: ModelArg,

        /// Serial number, when several controllers of the model are paired
        #[arg(short, long)]
        serial: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 50)]
        interval: u64,
    },

    /// Print the calibration read from the controller's flash
    Calibration {
        /// Controller model
        #[arg(short, long, value_enum)]
        model: ModelArg,

        /// Serial number
        #[arg(short, long)]
        serial: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Output file path (defaults to the user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("joycon_cmd={}", log_level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Monitor {
            model,
            serial,
            json,
            interval,
        } => {
            let config = load_config(cli.config.as_ref())?;
            monitor(model.into(), serial, &config, json, Duration::from_millis(interval))
        }
        Commands::Calibration { model, serial } => {
            let config = load_config(cli.config.as_ref())?;
            show_calibration(model.into(), serial, &config)
        }
        Commands::Init { output } => init_config(output.or(cli.config)),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DriverConfig> {
    match path.cloned().or_else(DriverConfig::default_path) {
        Some(path) => DriverConfig::load_or_default(path),
        None => Ok(DriverConfig::default()),
    }
}

fn connect(model: Model, serial: Option<String>, config: &DriverConfig) -> Result<JoyCon> {
    println!("{} Connecting to {}...", "→".bright_blue(), model);

    let identity = DeviceIdentity::from_model(model, serial);
    let joycon = JoyCon::open(identity, config)
        .with_context(|| format!("Failed to connect to {}", model))?;

    println!("{} Connected!", "✓".bright_green());
    Ok(joycon)
}

fn monitor(
    model: Model,
    serial: Option<String>,
    config: &DriverConfig,
    json: bool,
    interval: Duration,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let mut joycon = connect(model, serial, config)?;
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    while running.load(Ordering::SeqCst) {
        if joycon.poll_state() == PollState::Stopped {
            warn!("Controller disconnected");
            break;
        }

        if let Some(status) = joycon.status() {
            if json {
                print_status_json(&status);
            } else {
                print_status_pretty(&status);
            }
        }

        std::thread::sleep(interval);
    }

    joycon.close();
    println!("\n{} Monitoring stopped", "✓".bright_green());
    Ok(())
}

fn show_calibration(model: Model, serial: Option<String>, config: &DriverConfig) -> Result<()> {
    let mut joycon = connect(model, serial, config)?;
    let output = serde_json::to_string_pretty(joycon.calibration())?;
    joycon.close();

    println!("{}", output);
    Ok(())
}

fn init_config(output: Option<PathBuf>) -> Result<()> {
    let path = output
        .or_else(DriverConfig::default_path)
        .context("No config directory available, pass --output")?;

    DriverConfig::default().save(&path)?;
    info!("Wrote {}", path.display());
    println!("{} Created {}", "✓".bright_green(), path.display());
    Ok(())
}

fn print_status_json(status: &ControllerStatus) {
    if let Ok(json) = serde_json::to_string(status) {
        println!("{}", json);
    }
}

fn print_status_pretty(status: &ControllerStatus) {
    print!("\x1B[2J\x1B[1;1H"); // Clear screen

    println!("{}", "Joy-Con State".bright_white().bold());
    println!("=============");

    let battery = format!("{}/4", status.battery.level);
    println!(
        "Battery:     {}{}",
        if status.battery.level <= 1 {
            battery.bright_red()
        } else {
            battery.bright_green()
        },
        if status.battery.charging {
            " (charging)".dimmed()
        } else {
            "".normal()
        }
    );

    let pressed = pressed_buttons(status);
    println!(
        "Buttons:     {}",
        if pressed.is_empty() {
            "-".dimmed()
        } else {
            pressed.join(" ").bright_cyan()
        }
    );

    print_stick("Left Stick: ", &status.analog_sticks.left);
    print_stick("Right Stick:", &status.analog_sticks.right);

    for (i, sample) in status.accel.iter().enumerate() {
        println!(
            "Accel[{}]:    ({:+.3}, {:+.3}, {:+.3})",
            i, sample.x, sample.y, sample.z
        );
    }
}

fn print_stick(label: &str, stick: &StickPosition) {
    println!(
        "{} {} {}",
        label,
        format_bar(stick.horizontal),
        format_bar(stick.vertical)
    );
}

fn pressed_buttons(status: &ControllerStatus) -> Vec<&'static str> {
    let b = &status.buttons;
    [
        (b.right.y, "Y"),
        (b.right.x, "X"),
        (b.right.b, "B"),
        (b.right.a, "A"),
        (b.right.sr, "SR(R)"),
        (b.right.sl, "SL(R)"),
        (b.right.r, "R"),
        (b.right.zr, "ZR"),
        (b.shared.minus, "-"),
        (b.shared.plus, "+"),
        (b.shared.r_stick, "RS"),
        (b.shared.l_stick, "LS"),
        (b.shared.home, "Home"),
        (b.shared.capture, "Capture"),
        (b.left.down, "Down"),
        (b.left.up, "Up"),
        (b.left.right, "Right"),
        (b.left.left, "Left"),
        (b.left.sr, "SR(L)"),
        (b.left.sl, "SL(L)"),
        (b.left.l, "L"),
        (b.left.zl, "ZL"),
    ]
    .into_iter()
    .filter_map(|(pressed, name)| pressed.then_some(name))
    .collect()
}

fn format_bar(v: f32) -> String {
    let width = 10;
    let filled = ((v.clamp(-1.0, 1.0).abs()) * width as f32) as usize;
    let bar: String = if v >= 0.0 {
        format!("{:>w$}|{:<w$}", "", "█".repeat(filled), w = width)
    } else {
        format!("{:>w$}|{:<w$}", "█".repeat(filled), "", w = width)
    };
    format!("[{}] {:+.2}", bar, v)
}
