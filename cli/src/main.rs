use std::io::BufRead;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clinostat::config::TelemetryConfig;
use clinostat::{
    ChamberClient, Clinostat, CommandExecutor, CommunicationError, Config, ControlMessage, DeviceMode, LogNotifier,
    Notify, SensorReading, TelemetryMessage, TelemetryQueues, TelemetryServer, WateringStatus,
};
use log::{info, warn};

use crate::options::{Action, Options, PortArgs, ServerArgs};

mod options;
mod session;

fn main() {
    let options = Options::parse();
    let default_filter = if options.verbose() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Err(err) = run(&options) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(options: &Options) -> anyhow::Result<()> {
    let config = match options.config() {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    match options.action() {
        Action::Probe(port) => {
            let port = serial_port(port, &config)?;
            if Clinostat::probe(&port) {
                println!("Clinostat found on {port}");
            } else {
                println!("No clinostat answers on {port}");
            }
            Ok(())
        }
        Action::Echo(port) => {
            let mode = single_command(&serial_port(port, &config)?, Clinostat::echo)?;
            println!("Device is {mode}");
            Ok(())
        }
        Action::Run { port, chamber_rpm, frame_rpm } => {
            let speeds = (*chamber_rpm, *frame_rpm);
            single_command(&serial_port(port, &config)?, move |device| device.run(speeds))?;
            println!("Running at {chamber_rpm} / {frame_rpm} rpm");
            Ok(())
        }
        Action::Pause(port) => report_mode(single_command(&serial_port(port, &config)?, |device| {
            device.pause()?;
            Ok(device.mode())
        })?),
        Action::Resume(port) => report_mode(single_command(&serial_port(port, &config)?, |device| {
            device.resume()?;
            Ok(device.mode())
        })?),
        Action::Abort(port) => report_mode(single_command(&serial_port(port, &config)?, |device| {
            device.abort()?;
            Ok(device.mode())
        })?),
        Action::Home(port) => {
            single_command(&serial_port(port, &config)?, Clinostat::home)?;
            println!("Homing requested");
            Ok(())
        }
        Action::Water { port, volume } => {
            let volume = volume.unwrap_or(config.watering.volume_ml);
            match single_command(&serial_port(port, &config)?, move |device| device.dump_water(volume))? {
                WateringStatus::Started => println!("Watering {volume} ml"),
                WateringStatus::StillPumping => println!("Previous watering cycle is still running"),
            }
            Ok(())
        }
        Action::Serve(server) => serve(&telemetry_config(server, &config)),
        Action::Chamber { server, count, interval_ms } => {
            chamber(&telemetry_config(server, &config), *count, Duration::from_millis(*interval_ms))
        }
        Action::Session { port, server, no_server } => {
            let port = serial_port(port, &config)?;
            let telemetry = (!no_server).then(|| telemetry_config(server, &config));
            session::Session::new(port, config.watering.volume_ml).run(telemetry.as_ref())
        }
    }
}

fn serial_port(args: &PortArgs, config: &Config) -> anyhow::Result<String> {
    match args.port().or(config.serial.port.as_deref()) {
        Some(port) => Ok(port.to_string()),
        None => anyhow::bail!("No serial port given, pass --port or set serial.port in the config"),
    }
}

fn telemetry_config(args: &ServerArgs, config: &Config) -> TelemetryConfig {
    let mut telemetry = config.telemetry.clone();
    if let Some(address) = args.address() {
        telemetry.address = address.to_string();
    }
    if let Some(port) = args.tcp_port() {
        telemetry.port = port;
    }
    telemetry
}

fn report_mode(mode: DeviceMode) -> anyhow::Result<()> {
    println!("Device is {mode}");
    Ok(())
}

/// Connects, runs `job` through the executor and lets go of the port. The
/// controller reads Disconnect as an abort, so it is never sent here.
fn single_command<T, F>(port: &str, job: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Clinostat) -> Result<T, CommunicationError> + Send + 'static,
{
    let notifier: Arc<dyn Notify> = Arc::new(LogNotifier);
    let device = Clinostat::open(port, Arc::clone(&notifier)).with_context(|| format!("Failed to connect to {port}"))?;
    let executor = CommandExecutor::with_device(device, notifier);
    let (tx, rx) = mpsc::channel();
    let failure_tx = tx.clone();
    let worker = executor.execute(
        job,
        move |value| {
            let _ = tx.send(Ok(value));
        },
        move |err| {
            let _ = failure_tx.send(Err(err));
        },
    )?;
    if worker.join().is_err() {
        anyhow::bail!("Command worker panicked");
    }
    let outcome = rx.recv()?;
    executor.release();
    Ok(outcome?)
}

#[derive(serde_derive::Serialize)]
struct Record<'a> {
    received: chrono::DateTime<chrono::Local>,
    raw: &'a str,
    reading: Option<SensorReading>,
}

fn print_reading(message: &TelemetryMessage) {
    let reading = match SensorReading::try_from(message) {
        Ok(reading) => Some(reading),
        Err(err) => {
            warn!("Unreadable telemetry {:?}: {err}", message.as_str());
            None
        }
    };
    let record = Record {
        received: chrono::Local::now(),
        raw: message.as_str().trim_end(),
        reading,
    };
    match serde_json::to_string(&record) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("Error serializing reading to JSON: {err}"),
    }
}

/// Feeds control messages typed on stdin into the outbound queue until stdin closes.
fn forward_controls(outbound: mpsc::Sender<ControlMessage>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("Failed to read stdin: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ControlMessage>() {
            Ok(control) => {
                if outbound.send(control).is_err() {
                    break;
                }
                info!("Queued {control} for the next chamber contact");
            }
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn serve(config: &TelemetryConfig) -> anyhow::Result<()> {
    let (mut server, TelemetryQueues { inbound, outbound }) = TelemetryServer::new(config, Arc::new(LogNotifier));
    let addr = server.start(&config.address, config.port)?;
    eprintln!("Listening on {addr}, type control messages like `50;75` or `default`");
    thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || forward_controls(outbound))?;
    for message in inbound {
        print_reading(&message);
    }
    server.close();
    Ok(())
}

/// One accelerometer sample of a chamber spinning at a steady rate.
fn simulated_acceleration(index: u32) -> [f64; 3] {
    let angle = f64::from(index) * 0.1;
    [9.81 * angle.sin(), 9.81 * angle.cos(), 0.0]
}

fn chamber(config: &TelemetryConfig, count: u32, interval: Duration) -> anyhow::Result<()> {
    let client = ChamberClient::resolve(&config.address, config.port)?.with_timeout(config.client_timeout());
    let mut means = [0.0f64; 3];
    for index in 0..count {
        let acceleration = simulated_acceleration(index);
        let n = f64::from(index);
        for (mean, sample) in means.iter_mut().zip(acceleration) {
            *mean = *mean * n / (n + 1.0) + sample / (n + 1.0);
        }
        let reading = SensorReading {
            acceleration,
            mean_acceleration: means,
            temperatures: vec![21.0, 21.5, 22.0],
            moisture: (index % 10 == 9).then_some(42.0),
        };
        match client.exchange(&TelemetryMessage::from(&reading)) {
            Ok(control) => println!("{}: {control}", index + 1),
            Err(err) => warn!("Exchange {} with {} failed: {err}", index + 1, client.address()),
        }
        thread::sleep(interval);
    }
    Ok(())
}
