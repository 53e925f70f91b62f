use std::path::PathBuf;

#[derive(clap_derive::Parser, Debug, Clone)]
#[command(version, about = "Controls a clinostat and serves its sensor chamber")]
pub struct Options {
    #[arg(short, long)]
    ///YAML file with serial, telemetry and watering settings
    config: Option<PathBuf>,
    #[arg(short, long, default_value = "false")]
    ///Add extra for debugging information
    verbose: bool,
    #[command(subcommand)]
    action: Action,
}
impl Options {
    pub fn config(&self) -> Option<&std::path::Path> { self.config.as_deref() }
    pub const fn verbose(&self) -> bool { self.verbose }
    pub const fn action(&self) -> &Action { &self.action }
}

#[derive(clap_derive::Subcommand, Debug, Clone)]
pub enum Action {
    ///Checks whether a clinostat answers on the port, without taking it over
    Probe(PortArgs),
    ///Asks the controller what it is doing
    Echo(PortArgs),
    ///Starts both motors
    Run {
        #[command(flatten)]
        port: PortArgs,
        #[arg(long)]
        ///Chamber axis speed in RPM
        chamber_rpm: f32,
        #[arg(long)]
        ///Frame axis speed in RPM
        frame_rpm: f32,
    },
    ///Stops the motors, a resume continues with the same speeds
    Pause(PortArgs),
    ///Continues a paused run
    Resume(PortArgs),
    ///Stops the motors and ends the run
    Abort(PortArgs),
    ///Moves both axes to their home position
    Home(PortArgs),
    ///Starts a watering cycle
    Water {
        #[command(flatten)]
        port: PortArgs,
        #[arg(long)]
        ///Volume in ml, defaults to watering.volume_ml of the config
        volume: Option<f32>,
    },
    ///Runs the telemetry server. Readings are printed as JSON lines, control
    ///messages like `50;75` or `default` are read from stdin
    Serve(ServerArgs),
    ///Pretends to be a sensor chamber talking to a telemetry server
    Chamber {
        #[command(flatten)]
        server: ServerArgs,
        #[arg(long, default_value = "10")]
        ///Number of readings to send
        count: u32,
        #[arg(long, default_value = "200")]
        ///Pause between readings in milliseconds
        interval_ms: u64,
    },
    ///Interactive console with a persistent device connection and the telemetry server
    Session {
        #[command(flatten)]
        port: PortArgs,
        #[command(flatten)]
        server: ServerArgs,
        #[arg(long, default_value = "false")]
        ///Do not start the telemetry server
        no_server: bool,
    },
}

#[derive(clap_derive::Args, Debug, Clone, Default)]
pub struct PortArgs {
    #[arg(short, long)]
    ///Serial port of the controller, e.g. /dev/ttyACM0 or COM3
    port: Option<String>,
}
impl PortArgs {
    pub fn port(&self) -> Option<&str> { self.port.as_deref() }
}

#[derive(clap_derive::Args, Debug, Clone, Default)]
pub struct ServerArgs {
    #[arg(long)]
    ///Telemetry address, overrides telemetry.address of the config
    address: Option<String>,
    #[arg(long)]
    ///Telemetry port, overrides telemetry.port of the config
    tcp_port: Option<u16>,
}
impl ServerArgs {
    pub fn address(&self) -> Option<&str> { self.address.as_deref() }
    pub const fn tcp_port(&self) -> Option<u16> { self.tcp_port }
}
