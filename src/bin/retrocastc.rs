use std::{
    env,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Seek, SeekFrom, Write},
    os::unix::net::UnixStream,
    path::PathBuf,
    process::ExitCode,
    thread,
    time::Duration,
};

use retrocast::{config, ipc::IpcReply};
use serde_json::{json, Value};

fn paths() -> (PathBuf, PathBuf) {
    let cfg = config::read_config().unwrap_or_default();
    (cfg.output.socket_path(), cfg.output.events_path())
}

fn usage() {
    eprintln!(
        "{}",
        r"Usage:
  retrocastc play <path>             play a file from the media library
  retrocastc remote <url>            resolve and play a remote video
  retrocastc monitor [port]          wait for a UDP stream
  retrocastc stop
  retrocastc play-pause | pause | resume
  retrocastc seek <offset-seconds>
  retrocastc volume-up [step] | volume-down [step] | volume <0-100>
  retrocastc loop on|off
  retrocastc status
  retrocastc watch                   print phase/title on every change
"
    );
}

fn send(payload: &Value) -> std::io::Result<IpcReply> {
    let (sock, _) = paths();
    let mut stream = UnixStream::connect(sock)?;
    stream.write_all(payload.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    serde_json::from_str(&line).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn build(cmd: &str, args: &[String]) -> Option<Value> {
    let arg = args.first().map(String::as_str);
    Some(match cmd {
        "play" => json!({"cmd":"play-local","path":arg?}),
        "remote" | "youtube" => json!({"cmd":"play-remote","url":arg?}),
        "monitor" => json!({"cmd":"monitor","port":arg.and_then(|p| p.parse::<u16>().ok())}),
        "stop" => json!({"cmd":"stop"}),
        "play-pause" => json!({"cmd":"toggle-pause"}),
        "pause" => json!({"cmd":"pause"}),
        "resume" => json!({"cmd":"resume"}),
        "seek" => json!({"cmd":"seek","offset":arg?.parse::<f64>().ok()?}),
        "volume-up" => json!({"cmd":"volume-up","step":arg.and_then(|s| s.parse::<i64>().ok())}),
        "volume-down" => json!({"cmd":"volume-down","step":arg.and_then(|s| s.parse::<i64>().ok())}),
        "volume" => json!({"cmd":"set-volume","volume":arg?.parse::<f64>().ok()?}),
        "loop" => json!({"cmd":"loop","enabled":matches!(arg?, "on" | "true" | "1")}),
        "status" => json!({"cmd":"status"}),
        _ => return None,
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((cmd, rest)) = args.split_first() else {
        usage();
        return ExitCode::from(2);
    };

    if cmd == "watch" {
        run_watch();
        return ExitCode::SUCCESS;
    }

    let Some(payload) = build(cmd, rest) else {
        usage();
        return ExitCode::from(2);
    };

    match send(&payload) {
        Ok(reply) if reply.ok => {
            if let Some(data) = reply.data {
                println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
            }
            ExitCode::SUCCESS
        }
        Ok(reply) => {
            eprintln!("retrocastc: {}", reply.error.unwrap_or_else(|| "request failed".into()));
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("retrocastc: cannot reach retrocastd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn label(v: &Value) -> String {
    let phase = v.get("phase").and_then(Value::as_str).unwrap_or("?");
    match v.get("title").and_then(Value::as_str) {
        Some(title) => format!("{phase}: {title}"),
        None => phase.to_string(),
    }
}

fn run_watch() {
    let (_, path) = paths();
    let _ = OpenOptions::new().create(true).append(true).open(&path);

    loop {
        let Ok(file) = File::open(&path) else {
            thread::sleep(Duration::from_millis(300));
            continue;
        };
        let mut reader = BufReader::new(file);
        let _ = reader.get_mut().seek(SeekFrom::End(0));

        let mut last = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => thread::sleep(Duration::from_millis(250)),
                Ok(_) => {
                    if let Ok(v) = serde_json::from_str::<Value>(line.trim()) {
                        let out = label(&v);
                        if out != last {
                            println!("{out}");
                            let _ = std::io::stdout().flush();
                            last = out;
                        }
                    }
                }
            }
        }
    }
}
