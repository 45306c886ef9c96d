//! fasp-mock - stand-in transfer executable
//!
//! Connects to the management port given with `-M` and plays a scripted
//! session. Behaviour is driven by environment variables:
//!
//! - `FASP_MOCK_MODE`: `success` (default), `error`, `silent`, `exit-fail`,
//!   `done-exit-fail`, `done-without-init`, `no-connect`, `garbage`, `hang`,
//!   `command`
//! - `FASP_MOCK_CODE`, `FASP_MOCK_DESCRIPTION`: ERROR frame contents
//! - `FASP_MOCK_FAIL_TIMES` + `FASP_MOCK_STATE`: fail the first N runs, counted
//!   in the state file, then succeed
//! - `FASP_MOCK_ARGS_OUT`: append one JSON line per run with the arguments
//!   and the token received
//! - `FASP_MOCK_COMMAND_OUT`: in `command` mode, where to write the command
//!   frame received from the supervisor

use anyhow::{bail, Context, Result};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use fasprun::protocol::{Frame, FrameParser};

const DEFAULT_ERROR_CODE: &str = "19";
const DEFAULT_ERROR_DESCRIPTION: &str = "Authentication failure";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if let Ok(path) = env::var("FASP_MOCK_ARGS_OUT") {
        record_invocation(Path::new(&path), &args)?;
    }

    let port = management_port(&args)?;
    let mode = effective_mode()?;

    if mode == "no-connect" {
        thread::sleep(Duration::from_secs(60));
        return Ok(());
    }

    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .with_context(|| format!("Failed to connect to management port {port}"))?;

    if mode == "garbage" {
        stream.write_all(b"this is not a frame\n")?;
        thread::sleep(Duration::from_secs(60));
        return Ok(());
    }

    if mode == "done-without-init" {
        send(&mut stream, &Frame::with_type("DONE"))?;
        return Ok(());
    }

    let session_id = format!("mock-{}", std::process::id());
    send(&mut stream, &Frame::with_type("INIT").field("SessionId", &session_id))?;

    match mode.as_str() {
        "success" => {
            send(
                &mut stream,
                &Frame::with_type("NOTIFICATION").field("PreTransferBytes", "1000"),
            )?;
            send(&mut stream, &Frame::with_type("STATS").field("Bytescont", "500"))?;
            send(&mut stream, &Frame::with_type("STATS").field("Bytescont", "1000"))?;
            send(&mut stream, &Frame::with_type("DONE").field("Bytescont", "1000"))?;
        }
        "error" => {
            send_error(&mut stream)?;
            drop(stream);
            std::process::exit(1);
        }
        "silent" => {}
        "exit-fail" => {
            drop(stream);
            std::process::exit(3);
        }
        "done-exit-fail" => {
            send(&mut stream, &Frame::with_type("DONE"))?;
            drop(stream);
            std::process::exit(2);
        }
        "hang" => {
            thread::sleep(Duration::from_secs(60));
        }
        "command" => {
            let command = read_command(&stream)?;
            if let Ok(path) = env::var("FASP_MOCK_COMMAND_OUT") {
                fs::write(&path, command.encode())?;
            }
            send(&mut stream, &Frame::with_type("DONE"))?;
        }
        other => bail!("unknown FASP_MOCK_MODE: {other}"),
    }

    Ok(())
}

fn management_port(args: &[String]) -> Result<u16> {
    let pos = args
        .iter()
        .position(|a| a == "-M")
        .context("missing -M <port>")?;
    let port = args.get(pos + 1).context("missing value after -M")?;
    port.parse().with_context(|| format!("invalid management port {port:?}"))
}

/// Mode for this run, taking the fail counter into account.
fn effective_mode() -> Result<String> {
    let mode = env::var("FASP_MOCK_MODE").unwrap_or_else(|_| "success".to_string());
    let (Ok(times), Ok(state)) = (env::var("FASP_MOCK_FAIL_TIMES"), env::var("FASP_MOCK_STATE"))
    else {
        return Ok(mode);
    };
    let times: u32 = times.parse().context("invalid FASP_MOCK_FAIL_TIMES")?;
    let runs: u32 = fs::read_to_string(&state)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    fs::write(&state, (runs + 1).to_string())?;
    Ok(if runs < times { "error".to_string() } else { mode })
}

fn record_invocation(path: &Path, args: &[String]) -> Result<()> {
    let line = serde_json::json!({
        "args": args,
        "token": env::var("ASPERA_SCP_TOKEN").ok(),
    });
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn send(stream: &mut TcpStream, frame: &Frame) -> Result<()> {
    stream.write_all(frame.encode().as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn send_error(stream: &mut TcpStream) -> Result<()> {
    let code = env::var("FASP_MOCK_CODE").unwrap_or_else(|_| DEFAULT_ERROR_CODE.to_string());
    let description = env::var("FASP_MOCK_DESCRIPTION")
        .unwrap_or_else(|_| DEFAULT_ERROR_DESCRIPTION.to_string());
    send(
        stream,
        &Frame::with_type("ERROR")
            .field("Code", code)
            .field("Description", description),
    )
}

/// Block until one command frame arrives. Blank lines between commands are
/// skipped.
fn read_command(stream: &TcpStream) -> Result<Frame> {
    let mut parser = FrameParser::new();
    let reader = BufReader::new(stream.try_clone()?);
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() && !parser.has_pending() {
            continue;
        }
        if let Some(frame) = parser.push_line(&line)? {
            return Ok(frame);
        }
    }
    bail!("management channel closed before a command arrived")
}
