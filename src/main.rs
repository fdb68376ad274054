// Esox GenericObjectPool
// Thread-safe pool for expensive resources with idle eviction

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic
// Set RUST_LOG=esox_genericpool=debug to watch the pool at work

use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration};
use std::time::Duration;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

fn main() {
    init_tracing();

    println!("=== Esox GenericObjectPool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    println!("Quick Demo:");
    let config = PoolConfiguration::new()
        .with_max_total(2)
        .with_eviction_interval(Duration::from_millis(100));
    let pool = match GenericObjectPool::new(FnFactory::new(|| Ok(String::from("resource"))), config)
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("  Could not create pool: {e}");
            return;
        }
    };

    match pool.borrow_object() {
        Ok(obj) => println!("  Got object {}: {}", obj.id(), *obj),
        Err(e) => println!("  Borrow failed: {e}"),
    }

    println!("  Idle after return: {}", pool.num_idle());
    pool.close();
}
