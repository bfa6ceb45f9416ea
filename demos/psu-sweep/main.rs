use std::{env, process::exit, time::Duration};

use labeq_rs::{
    connection::ConnectionSpec,
    equipment::{Instrument, Opened, drivers::Dp800},
    resource::TransportKind,
};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        println!("Usage: ... <address> [cycles]");
        println!("  <address>: IP address of a DP800 series supply");
        println!("  [cycles]:  number of sweep cycles, default 3");
        exit(1);
    }
    let cycles: u32 = match args.get(2) {
        Some(n) => n.parse()?,
        None => 3,
    };

    let spec = ConnectionSpec::new(TransportKind::Ip, &args[1])?;
    let mut psu = match Dp800::open(spec).await {
        Opened::Ready(psu) => psu,
        Opened::Failed(_, e) => {
            println!("Could not connect: {e}");
            exit(1);
        }
    };
    let model = psu.detect_model().await?;
    println!("Detected {model:?} with {} channels", psu.core().channels());

    let ratings = psu.core().ratings();
    /* Scale to each channel's rated output so negative rails work too */
    let level = |chan: u8, fraction: f64| {
        let rating = ratings[usize::from(chan - 1)];
        if rating.max_voltage > 0.0 {
            rating.max_voltage * fraction
        } else {
            rating.min_voltage * fraction
        }
    };

    for chan in 1..=psu.core().channels() {
        psu.set_voltage(chan, level(chan, 0.5)).await?;
        psu.set_current(chan, 0.5_f64.min(ratings[usize::from(chan - 1)].max_current)).await?;
        println!("CH{chan} on: {}", psu.toggle_output(chan, "ON").await?);
        println!("CH{chan}: {:.3} V", psu.meas_voltage(chan).await?.value);
    }

    for cycle in 0..cycles {
        for step in 1..=2 {
            for chan in 1..=psu.core().channels() {
                psu.set_voltage(chan, level(chan, 0.1 * f64::from(step))).await?;
            }
            sleep(Duration::from_secs(1)).await;
        }
        for chan in 1..=psu.core().channels() {
            println!(
                "cycle {cycle} CH{chan}: {:.3} V, {:.3} A",
                psu.meas_voltage(chan).await?.value,
                psu.meas_current(chan).await?.value
            );
        }
    }

    for chan in 1..=psu.core().channels() {
        psu.toggle_output(chan, "OFF").await?;
    }
    psu.disconnect().await?;

    Ok(())
}
