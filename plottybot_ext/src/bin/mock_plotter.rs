use plottybot_ext::MockPlotter;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_ADDR: &str = "0.0.0.0:8766";

fn parse_arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() {
    plottybot_ext::init_tracing("info");

    let args: Vec<String> = std::env::args().collect();

    let addr = parse_arg_value(&args, "--addr")
        .or_else(|| std::env::var("PLOTTY_MOCK_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let addr_file = parse_arg_value(&args, "--addr-file").map(PathBuf::from);
    let run_for_ms = parse_arg_value(&args, "--run-for-ms")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);

    let plotter = match MockPlotter::spawn(&addr) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("mock_plotter: bind {addr} failed: {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &addr_file {
        let _ = fs::write(path, plotter.listen_addr().to_string());
    }

    println!("mock_plotter listening on ws://{}", plotter.listen_addr());

    let start = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(100));
        if let Some(max) = run_for_ms {
            if start.elapsed() >= max {
                break;
            }
        }
    }

    println!("mock_plotter received {} message(s)", plotter.received().len());
    plotter.shutdown();
}
