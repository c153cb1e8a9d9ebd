//! Entry point for the Svarog3D sorting demo.
//! Logging + command-line options.

use std::path::PathBuf;

use anyhow::Result;
use corelib::order::DrawOrder;
use platform::DemoOptions;

fn parse_order_arg(args: &[String]) -> DrawOrder {
    // Accept: --order=back-to-front|front-to-back|state
    let mut order = DrawOrder::default();
    for arg in args {
        if let Some(val) = arg.strip_prefix("--order=") {
            order = match val.parse() {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("{e}, falling back to {}.", DrawOrder::default());
                    DrawOrder::default()
                }
            };
        }
    }
    order
}

fn parse_size_args(args: &[String]) -> (u32, u32) {
    let mut w: Option<u32> = None;
    let mut h: Option<u32> = None;

    for arg in args {
        if let Some(v) = arg.strip_prefix("--size=") {
            if let Some((sw, sh)) = v.split_once('x').or_else(|| v.split_once('X')) {
                if let (Ok(pw), Ok(ph)) = (sw.parse::<u32>(), sh.parse::<u32>()) {
                    w = Some(pw);
                    h = Some(ph);
                }
            }
        } else if let Some(v) = arg.strip_prefix("--width=") {
            if let Ok(pw) = v.parse::<u32>() {
                w = Some(pw);
            }
        } else if let Some(v) = arg.strip_prefix("--height=") {
            if let Ok(ph) = v.parse::<u32>() {
                h = Some(ph);
            }
        }
    }

    let ww = w.unwrap_or(1280).max(1);
    let hh = h.unwrap_or(720).max(1);
    (ww, hh)
}

fn parse_objects_arg(args: &[String], default: usize) -> usize {
    args.iter()
        .filter_map(|arg| arg.strip_prefix("--objects="))
        .filter_map(|v| v.parse::<usize>().ok())
        .last()
        .unwrap_or(default)
}

/// `--queue=N` bounds the device queue, `--queue=unbounded` lifts the bound.
fn parse_queue_arg(args: &[String], default: Option<usize>) -> Option<usize> {
    let mut capacity = default;
    for arg in args {
        if let Some(val) = arg.strip_prefix("--queue=") {
            capacity = match val {
                "unbounded" | "none" => None,
                n => match n.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => {
                        log::warn!("Bad queue capacity '{}', keeping {:?}.", n, capacity);
                        capacity
                    }
                },
            };
        }
    }
    capacity
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .filter_map(|arg| arg.strip_prefix(flag))
        .filter_map(|v| v.strip_prefix('='))
        .last()
        .map(str::to_owned)
}

fn parse_options(args: &[String]) -> DemoOptions {
    let defaults = DemoOptions::default();
    let (width, height) = parse_size_args(args);
    DemoOptions {
        width,
        height,
        objects: parse_objects_arg(args, defaults.objects),
        order: parse_order_arg(args),
        shader: parse_path_arg(args, "--shader").unwrap_or(defaults.shader),
        texture: parse_path_arg(args, "--texture").map(PathBuf::from),
        queue_capacity: parse_queue_arg(args, defaults.queue_capacity),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_options(&args);
    log::info!(
        "Starting Svarog3D. order={}, objects={}, window_size={}x{}, shader={}, queue={:?}",
        options.order,
        options.objects,
        options.width,
        options.height,
        options.shader,
        options.queue_capacity
    );

    platform::run_demo(options)?;

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
