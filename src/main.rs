// ttlpool demo binary
// The library lives in lib.rs; this only exercises it end to end.

use std::io::Write;
use std::thread;
use std::time::Duration;

use ttlpool::{MetricsExporter, OpenFlags, Pool, PoolConfiguration, PoolResult, Ttl, telemetry};

fn main() -> PoolResult<()> {
    telemetry::init_tracing();

    println!("=== ttlpool ===");
    println!();

    println!("Generic pool:");
    let pool = Pool::new(
        PoolConfiguration::new(Ttl::After(Duration::from_millis(1500)))
            .with_factory(|| Ok(String::from("fresh")))
            .with_destructor(|value| println!("  destroyed: {}", value))
            .with_name("demo"),
    );
    pool.put(String::from("pooled"))?;
    println!("  got: {}", pool.get()?);
    println!("  got: {}", pool.get()?);

    pool.put(String::from("expiring"))?;
    println!("  size before reaping: {}", pool.size());
    thread::sleep(Duration::from_millis(2600));
    println!("  size after reaping: {}", pool.size());
    print!("{}", MetricsExporter::export_prometheus(&pool.metrics(), pool.name(), None));
    println!();

    println!("File pool:");
    let path = std::env::temp_dir().join("ttlpool-demo.log");
    for line in ["first", "second"] {
        let mut file = ttlpool::open(&path, OpenFlags::append_only(), 0o644, None)?;
        writeln!(file, "{}", line)?;
        file.close()?;
    }
    println!("  wrote two lines to {}", path.display());

    Ok(())
}
