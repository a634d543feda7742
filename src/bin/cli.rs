//! tuya-stub CLI Client
//!
//! Command-line client that speaks the device protocol, handy for poking a
//! running stub (or a real device) by hand.

use std::net::TcpStream;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tuya_stub::protocol::{
    read_messages, write_message, Cipher, CommandType, ControlPayload, FrameCodec, Message,
    Payload, QueryPayload,
};
use tuya_stub::{DeviceIdentity, DpKey, DpValue, Dps, ProtocolVersion, Result};

/// tuya-stub CLI
#[derive(Parser, Debug)]
#[command(name = "tuya-stub-cli")]
#[command(about = "CLI for talking to an emulated Tuya device")]
struct Args {
    /// Device address
    #[arg(short, long, default_value = "127.0.0.1:6668")]
    server: String,

    /// Device id
    #[arg(long)]
    id: String,

    /// 16-byte local key
    #[arg(long)]
    key: String,

    /// Response timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read all data points
    Query,

    /// Set one data point
    Set {
        /// Data point id
        dp: String,

        /// New value (true/false, a number, or text)
        value: String,
    },

    /// Send a heartbeat
    Ping,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let identity = DeviceIdentity::new(&args.id, &args.key, ProtocolVersion::V3_1)?;
    let codec = FrameCodec::new(Cipher::new(&identity.shared_key, identity.version));

    let mut stream = TcpStream::connect(&args.server)?;
    stream.set_read_timeout(Some(Duration::from_secs(args.timeout)))?;

    let request = match &args.command {
        Commands::Query => Message::new(
            CommandType::Query,
            1,
            Payload::Query(QueryPayload::request(&identity.id)),
        ),
        Commands::Set { dp, value } => {
            let mut dps = Dps::new();
            dps.insert(DpKey::from(dp.as_str()), DpValue::parse_loose(value));
            let t = chrono::Utc::now().timestamp();
            Message::new(
                CommandType::Control,
                1,
                Payload::Control(ControlPayload::new(&identity.id, t, dps)),
            )
        }
        Commands::Ping => Message::new(CommandType::Heartbeat, 1, Payload::Empty),
    };

    write_message(&mut stream, &codec, &request)?;

    // A CONTROL is acked first and answered with a STATUS push after
    let awaiting_status = request.command == CommandType::Control;

    let mut decoder = codec.decoder();
    loop {
        for decoded in read_messages(&mut stream, &mut decoder)? {
            let message = decoded?;
            print_message(&message);

            let done = if awaiting_status {
                message.command == CommandType::Status
            } else {
                message.sequence == request.sequence
            };
            if done {
                return Ok(());
            }
        }
    }
}

fn print_message(message: &Message) {
    let body = match &message.payload {
        Payload::Empty => "(empty)".to_string(),
        Payload::Query(p) => format_dps(p.dps.as_ref()),
        Payload::Control(p) => format_dps(Some(&p.dps)),
        Payload::Status(p) => format_dps(Some(&p.dps)),
        Payload::Discovery(p) => format!("discovery from {} ({})", p.gw_id, p.ip),
        Payload::Raw(bytes) => format!("{} raw bytes", bytes.len()),
    };
    println!("{} seq={} {}", message.command, message.sequence, body);
}

fn format_dps(dps: Option<&Dps>) -> String {
    match dps {
        Some(dps) => dps
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" "),
        None => "(no dps)".to_string(),
    }
}
