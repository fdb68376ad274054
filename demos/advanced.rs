//! Advanced features: eviction, fairness, error listeners, Prometheus export

use esox_genericpool::{
    EvictionBatch, EvictionPolicy, FactoryError, GenericObjectPool, PoolConfiguration, PoolError,
    PooledObjectFactory,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct Connection {
    id: usize,
    healthy: bool,
}

#[derive(Default)]
struct ConnectionFactory {
    next_id: AtomicUsize,
}

impl PooledObjectFactory<Connection> for ConnectionFactory {
    fn make_object(&self) -> Result<Connection, FactoryError> {
        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            healthy: true,
        })
    }

    fn destroy_object(&self, conn: Connection) -> Result<(), FactoryError> {
        if !conn.healthy {
            return Err(format!("connection {} already broken", conn.id).into());
        }
        println!("   Closing connection {}", conn.id);
        Ok(())
    }

    fn validate_object(&self, conn: &Connection) -> bool {
        conn.healthy
    }
}

fn main() {
    println!("=== Esox GenericObjectPool - Advanced Features ===\n");

    // Example 1: Idle eviction
    idle_eviction();

    // Example 2: Fair hand-off between waiting threads
    fairness();

    // Example 3: Swallowed error listener
    error_listener();

    // Example 4: Prometheus metrics
    prometheus_export();

    // Example 5: Object listing
    object_listing();
}

fn idle_eviction() {
    println!("1. Idle Eviction:");

    let config = PoolConfiguration::new()
        .with_min_idle(1)
        .with_min_evictable_idle_time(Duration::from_millis(50))
        .with_eviction_interval(Duration::from_millis(25))
        .with_eviction_batch(EvictionBatch::Fraction(1));
    let pool = GenericObjectPool::new(ConnectionFactory::default(), config).unwrap();

    pool.add_objects(4).unwrap();
    println!("   Idle before: {}", pool.num_idle());

    thread::sleep(Duration::from_millis(200));
    println!("   Idle after: {}", pool.num_idle());
    println!(
        "   Destroyed by evictor: {}\n",
        pool.metrics().destroyed_by_evictor_count
    );
}

fn fairness() {
    println!("2. Fairness:");

    let pool = GenericObjectPool::new(
        ConnectionFactory::default(),
        PoolConfiguration::new().with_max_total(1).with_fairness(true),
    )
    .unwrap();

    let held = pool.borrow_object().unwrap();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut handles = vec![];
    for i in 0..3 {
        let pool = pool.clone();
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let conn = pool.borrow_object().unwrap();
            order.lock().push(i);
            drop(conn);
        }));
        // give each waiter time to queue up in turn
        thread::sleep(Duration::from_millis(20));
    }

    drop(held);
    for handle in handles {
        handle.join().unwrap();
    }
    println!("   Served in arrival order: {:?}\n", order.lock());
}

fn error_listener() {
    println!("3. Error Listener:");

    let pool = GenericObjectPool::new(
        ConnectionFactory::default(),
        PoolConfiguration::new()
            .with_test_while_idle()
            .with_eviction_policy(EvictionPolicy::TimeToLive(Duration::from_secs(60))),
    )
    .unwrap();

    pool.set_swallowed_error_listener(|err: &PoolError| {
        println!("   Swallowed: {err}");
    });

    {
        let mut conn = pool.borrow_object().unwrap();
        conn.healthy = false;
    }
    pool.evict().unwrap();
    println!("   Idle after idle test: {}\n", pool.num_idle());
}

fn prometheus_export() {
    println!("4. Prometheus Metrics:");

    let pool = GenericObjectPool::new(ConnectionFactory::default(), PoolConfiguration::default())
        .unwrap();

    {
        let _c1 = pool.borrow_object().unwrap();
        let _c2 = pool.borrow_object().unwrap();
    }

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "api".to_string());
    tags.insert("env".to_string(), "prod".to_string());

    match pool.export_metrics_prometheus("connections", Some(&tags)) {
        Ok(output) => {
            for line in output.lines().take(6) {
                println!("   {line}");
            }
        }
        Err(e) => println!("   Export failed: {e}"),
    }
    println!();
}

fn object_listing() {
    println!("5. Object Listing:");

    let pool = GenericObjectPool::new(ConnectionFactory::default(), PoolConfiguration::default())
        .unwrap();
    pool.add_objects(2).unwrap();
    let _held = pool.borrow_object().unwrap();

    for info in pool.list_all_objects() {
        println!(
            "   {} state={:?} borrowed={} age={:?}",
            info.id,
            info.state,
            info.borrowed_count,
            info.age()
        );
    }
}
