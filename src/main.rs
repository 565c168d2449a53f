use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::error;
use smol::block_on;

use tradfri_blink::coap::GatewayPairing;
use tradfri_blink::pairing::{self, CredentialSource};
use tradfri_blink::store::DEFAULT_CONFIG_FILE;
use tradfri_blink::{CredentialStore, Effect, Effects, Error, Result, Session};

#[derive(Parser, Debug)]
#[command(version, about = "Run lighting effects across the bulbs of a Tradfri gateway")]
struct Cli {
    /// IP address of your Tradfri gateway
    #[arg(long, default_value = "192.168.0.108")]
    host: String,

    /// Security Code found on your Tradfri gateway
    #[arg(short = 'K', long = "key")]
    key: Option<String>,

    /// File holding the paired identity and key per gateway
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Seconds to wait for each gateway response
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flash every light on and off together
    Blink(BlinkArgs),
    /// Random colour and brightness per light
    Chaotic,
    /// Palette colours for the first three lights
    Predetermined,
    /// Shared brightness, individual random colours
    SynchBrightness {
        #[arg(long, default_value_t = 0.3)]
        sleep: f64,
    },
    /// Shared brightness and colour
    SynchAll {
        #[arg(long, default_value_t = 0.5)]
        sleep: f64,
    },
    /// Chase a brightness gradient along the lights
    Train(TrainArgs),
    /// Print the raw JSON of every device and exit
    DumpDevices,
    /// Print every numeric endpoint the gateway advertises and exit
    DumpAll,
    /// Print gateway details and what it controls, then exit
    Info,
}

#[derive(Args, Debug)]
struct BlinkArgs {
    /// Give each light its own random colour
    #[arg(long)]
    random_colour: bool,
    /// Seconds the lights stay lit
    #[arg(long, default_value_t = 0.5)]
    wake: f64,
    /// Seconds the lights stay dark
    #[arg(long, default_value_t = 0.2)]
    sleep: f64,
    /// Fade the bulbs apply to each change, in seconds
    #[arg(long, default_value_t = 0.0001)]
    transition: f64,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Seconds between steps
    #[arg(long, default_value_t = 0.2)]
    speed: f64,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    min: u8,
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    max: u8,
    /// Light positions in the order they are laid out
    #[arg(long, value_delimiter = ',', default_values_t = [0, 1, 2])]
    order: Vec<usize>,
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::Config(format!("{} is not a usable number of seconds: {}", value, e)))
}

impl Command {
    fn effect(&self) -> Result<Option<Effect>> {
        Ok(Some(match self {
            Command::Blink(args) => Effect::Blink {
                sleep: seconds(args.sleep)?,
                wake: seconds(args.wake)?,
                transition: seconds(args.transition)?,
                random_colour: args.random_colour,
            },
            Command::Chaotic => Effect::Chaotic,
            Command::Predetermined => Effect::Predetermined,
            Command::SynchBrightness { sleep } => Effect::SynchBrightness {
                sleep: seconds(*sleep)?,
            },
            Command::SynchAll { sleep } => Effect::SynchAll {
                sleep: seconds(*sleep)?,
            },
            Command::Train(args) => Effect::Train {
                speed: seconds(args.speed)?,
                min: args.min,
                max: args.max,
                order: args.order.clone(),
            },
            Command::DumpDevices | Command::DumpAll | Command::Info => return Ok(None),
        }))
    }
}

async fn run(cli: Cli) -> Result<()> {
    let timeout = seconds(cli.timeout)?;
    let effect = match &cli.command {
        Some(command) => command.effect()?.unwrap_or_default(),
        None => Effect::default(),
    };
    let store = CredentialStore::new(&cli.config);

    let source = CredentialSource::select(&store.load_or_default(), &cli.host, cli.key);
    let acquired = source.resolve(&mut io::stdin().lock(), &mut io::stdout())?;
    let record = pairing::bootstrap(
        &store,
        &cli.host,
        acquired,
        &GatewayPairing::new(&cli.host, timeout),
    )
    .await?;

    let session = Session::connect(&cli.host, &record.identity, &record.key, timeout).await?;

    match cli.command {
        Some(Command::DumpDevices) => {
            let raw: Vec<_> = session
                .get_devices()
                .await?
                .iter()
                .map(|device| device.raw().clone())
                .collect();
            println!("{}", serde_json::to_string_pretty(&raw)?);
        }
        Some(Command::DumpAll) => {
            for (endpoint, value) in session.dump_all().await? {
                println!("{}", endpoint);
                println!("{}", serde_json::to_string_pretty(&value)?);
                println!();
            }
        }
        Some(Command::Info) => {
            let snapshot = session.snapshot().await?;
            let gateway = &snapshot.gateway;
            println!("firmware:   {}", gateway.firmware_version);
            println!("homekit id: {}", gateway.homekit_id.as_deref().unwrap_or("-"));
            println!("ntp server: {}", gateway.ntp_server);
            match gateway.current_time {
                Some(time) => println!("clock:      {} (unix seconds)", time),
                None => println!("clock:      -"),
            }
            for light in &snapshot.lights {
                println!("light       {}", light);
            }
            for group in &snapshot.groups {
                println!(
                    "group       {} ({}), {} members, {} at dimmer {}",
                    group.name,
                    group.id,
                    group.members.len(),
                    if group.on { "on" } else { "off" },
                    group.dimmer
                );
            }
            for mood in &snapshot.moods {
                println!("mood        {} ({})", mood.name, mood.id);
            }
            for task in &snapshot.tasks {
                println!("task        {} {:?} enabled={}", task.id, task.task_type, task.enabled);
            }
        }
        _ => {
            let snapshot = session.snapshot().await?;
            Effects::new(&session, &snapshot.lights, rand::thread_rng())
                .run_forever(&effect)
                .await?;
        }
    }
    Ok(())
}

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "tradfri_blink=info");
    }
    pretty_env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = block_on(run(cli)) {
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_accepts_fractions() {
        assert_eq!(seconds(0.2).unwrap(), Duration::from_millis(200));
        assert_eq!(seconds(0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn unusable_seconds_are_config_errors() {
        for value in [f64::INFINITY, f64::NAN, -1.0, 1e300] {
            assert!(matches!(seconds(value), Err(Error::Config(_))), "{}", value);
        }
    }

    #[test]
    fn bad_effect_timing_is_caught_before_connecting() {
        let cli = Cli::try_parse_from(["tradfri-blink", "synch-all", "--sleep", "inf"]).unwrap();

        let result = cli.command.as_ref().map(Command::effect);

        assert!(matches!(result, Some(Err(Error::Config(_)))));
    }

    #[test]
    fn info_needs_no_effect() {
        let cli = Cli::try_parse_from(["tradfri-blink", "--host", "10.0.0.2", "info"]).unwrap();

        assert_eq!(cli.host, "10.0.0.2");
        assert!(matches!(cli.command.map(|c| c.effect()), Some(Ok(None))));
    }
}
