use std::io::BufRead;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use clinostat::config::TelemetryConfig;
use clinostat::{
    Clinostat, CommandExecutor, CommunicationError, ControlMessage, DeviceMode, Headline, LogNotifier, Notify,
    SensorReading, Severity, TelemetryMessage, TelemetryQueues, TelemetryServer, WateringStatus,
};
use log::{info, warn};

const HELP: &str = "\
connect                  open the serial port and say hello
disconnect               close the serial port
echo                     ask the controller what it is doing
run <chamber> <frame>    start the motors, speeds in RPM
pause | resume | abort   motor control
home                     move both axes home
water [ml]               start a watering cycle
lights <red> <blue>      queue light intensities for the chamber, 0 to 100
default                  withdraw a queued light change
status                   show the panel state
quit                     leave";

/// What the console shows. Only the executor callbacks change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Panel {
    Disconnected,
    Connected(DeviceMode),
}

pub struct Session {
    port: String,
    volume_ml: f32,
    notifier: Arc<dyn Notify>,
    executor: CommandExecutor,
    panel: Arc<Mutex<Panel>>,
}

impl Session {
    pub fn new(port: String, volume_ml: f32) -> Self {
        let notifier: Arc<dyn Notify> = Arc::new(LogNotifier);
        Session {
            port,
            volume_ml,
            executor: CommandExecutor::new(Arc::clone(&notifier)),
            notifier,
            panel: Arc::new(Mutex::new(Panel::Disconnected)),
        }
    }

    pub fn run(&self, telemetry: Option<&TelemetryConfig>) -> anyhow::Result<()> {
        let mut server = None;
        let mut outbound = None;
        if let Some(config) = telemetry {
            let (mut telemetry_server, TelemetryQueues { inbound, outbound: controls }) =
                TelemetryServer::new(config, Arc::clone(&self.notifier));
            // A busy address only costs the chamber link, the device can still be driven.
            if telemetry_server.start(&config.address, config.port).is_ok() {
                thread::Builder::new()
                    .name("telemetry-consumer".to_string())
                    .spawn(move || consume_readings(inbound))?;
                outbound = Some(controls);
            }
            server = Some(telemetry_server);
        }

        println!("{HELP}");
        for line in std::io::stdin().lock().lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                [] => {}
                ["quit" | "exit"] => break,
                ["help"] => println!("{HELP}"),
                ["status"] => println!("{}", self.status()),
                ["connect"] => self.connect(),
                ["disconnect"] => {
                    if self.executor.detach() {
                        self.set_panel(Panel::Disconnected);
                        println!("Disconnected from {}", self.port);
                    }
                }
                ["echo"] => self.dispatch("echo", Clinostat::echo),
                ["run", chamber, frame] => match (chamber.parse::<f32>(), frame.parse::<f32>()) {
                    (Ok(chamber), Ok(frame)) => self.dispatch("run", move |device| {
                        device.run((chamber, frame))?;
                        Ok(device.mode())
                    }),
                    _ => println!("Speeds must be numbers"),
                },
                ["pause"] => self.dispatch("pause", |device| {
                    device.pause()?;
                    Ok(device.mode())
                }),
                ["resume"] => self.dispatch("resume", |device| {
                    device.resume()?;
                    Ok(device.mode())
                }),
                ["abort"] => self.dispatch("abort", |device| {
                    device.abort()?;
                    Ok(device.mode())
                }),
                ["home"] => self.dispatch("home", |device| {
                    device.home()?;
                    Ok(device.mode())
                }),
                ["water"] => self.water(self.volume_ml),
                ["water", volume] => match volume.parse::<f32>() {
                    Ok(volume) => self.water(volume),
                    Err(_) => println!("Volume must be a number"),
                },
                ["lights", ..] | ["default"] => match (&outbound, words[1..].join(";").as_str()) {
                    (None, _) => println!("Telemetry server is not running"),
                    (Some(outbound), "") => queue_control(outbound, ControlMessage::Default),
                    (Some(outbound), intensities) => match intensities.parse::<ControlMessage>() {
                        Ok(control) => queue_control(outbound, control),
                        Err(err) => println!("{err}"),
                    },
                },
                _ => println!("Unknown command, type `help`"),
            }
        }

        self.executor.detach();
        if let Some(mut server) = server {
            server.close();
        }
        Ok(())
    }

    fn connect(&self) {
        if self.executor.is_connected() {
            println!("Already connected to {}", self.port);
            return;
        }
        if !Clinostat::probe(&self.port) {
            println!("No clinostat answers on {}", self.port);
            return;
        }
        match Clinostat::open(&self.port, Arc::clone(&self.notifier)) {
            Ok(device) => {
                let mode = device.mode();
                self.executor.attach(device);
                self.set_panel(Panel::Connected(mode));
            }
            Err(err) => self.notifier.notify(Headline::Serial, Severity::Error, &err.to_string()),
        }
    }

    fn water(&self, volume_ml: f32) {
        let panel = Arc::clone(&self.panel);
        let spawned = self.executor.execute(
            move |device| Ok((device.dump_water(volume_ml)?, device.mode())),
            move |(status, mode)| {
                set(&panel, Panel::Connected(mode));
                if status == WateringStatus::StillPumping {
                    println!("Watering request ignored, the last cycle is still running");
                }
            },
            on_failure(Arc::clone(&self.panel), "water"),
        );
        if let Err(err) = spawned {
            warn!("Failed to start water: {err}");
        }
    }

    /// Runs `job` in the background; its result becomes the new panel state.
    fn dispatch<F>(&self, label: &'static str, job: F)
    where
        F: FnOnce(&mut Clinostat) -> Result<DeviceMode, CommunicationError> + Send + 'static,
    {
        let panel = Arc::clone(&self.panel);
        let spawned = self.executor.execute(
            job,
            move |mode| {
                set(&panel, Panel::Connected(mode));
                info!("{label} done, device is {mode}");
            },
            on_failure(Arc::clone(&self.panel), label),
        );
        if let Err(err) = spawned {
            warn!("Failed to start {label}: {err}");
        }
    }

    fn set_panel(&self, state: Panel) {
        set(&self.panel, state);
    }

    fn status(&self) -> String {
        match *self.panel.lock().unwrap_or_else(PoisonError::into_inner) {
            Panel::Disconnected => format!("Disconnected ({})", self.port),
            Panel::Connected(mode) => format!("Connected to {}, device is {mode}", self.port),
        }
    }
}

fn set(panel: &Mutex<Panel>, state: Panel) {
    *panel.lock().unwrap_or_else(PoisonError::into_inner) = state;
}

/// The executor already reported the error and dropped the device.
fn on_failure(panel: Arc<Mutex<Panel>>, label: &'static str) -> impl FnOnce(CommunicationError) + Send + 'static {
    move |_err| {
        set(&panel, Panel::Disconnected);
        println!("{label} failed, type `connect` to reconnect");
    }
}

fn queue_control(outbound: &mpsc::Sender<ControlMessage>, control: ControlMessage) {
    match outbound.send(control) {
        Ok(()) => println!("Queued {control} for the next chamber contact"),
        Err(err) => warn!("Telemetry server is gone: {err}"),
    }
}

fn consume_readings(inbound: mpsc::Receiver<TelemetryMessage>) {
    for message in inbound {
        match SensorReading::try_from(&message) {
            Ok(reading) => info!(
                "Chamber: accel {:?}, temperatures {:?}, moisture {:?}",
                reading.mean_acceleration, reading.temperatures, reading.moisture
            ),
            Err(err) => warn!("Unreadable telemetry {:?}: {err}", message.as_str()),
        }
    }
}
