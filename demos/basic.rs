//! Basic usage examples for GenericObjectPool

use esox_genericpool::{
    FactoryError, FnFactory, GenericObjectPool, PoolConfiguration, PoolError, PooledObjectFactory,
    WhenExhaustedAction,
};

fn main() {
    println!("=== Esox GenericObjectPool - Basic Examples ===\n");

    // Example 1: Closure factory
    simple_pool();

    // Example 2: Full factory with validation
    validated_pool();

    // Example 3: Exhaustion behaviour
    exhaustion();

    // Example 4: Metrics
    metrics();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = GenericObjectPool::new(
        FnFactory::new(|| Ok(String::with_capacity(64))),
        PoolConfiguration::default(),
    )
    .unwrap();

    {
        let mut buf = pool.borrow_object().unwrap();
        buf.push_str("hello");
        println!("   Got object {}: {:?}", buf.id(), *buf);
        // Object automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.num_idle());
}

/// Hands out counters and rejects any that have gone odd
struct Counters;

impl PooledObjectFactory<u64> for Counters {
    fn make_object(&self) -> Result<u64, FactoryError> {
        Ok(0)
    }

    fn validate_object(&self, obj: &u64) -> bool {
        obj % 2 == 0
    }

    fn passivate_object(&self, obj: &mut u64) -> Result<(), FactoryError> {
        // keep even values even across returns
        *obj += *obj % 2;
        Ok(())
    }
}

fn validated_pool() {
    println!("2. Validated Pool:");

    let config = PoolConfiguration::new()
        .with_max_total(5)
        .with_test_on_borrow()
        .with_test_on_return();
    let pool = GenericObjectPool::new(Counters, config).unwrap();

    {
        let mut a = pool.borrow_object().unwrap();
        let _b = pool.borrow_object().unwrap();
        *a += 1;
        println!("   Active objects: {}", pool.num_active());
        println!("   Idle objects: {}", pool.num_idle());
    }

    println!("   After return - Idle: {}\n", pool.num_idle());
}

fn exhaustion() {
    println!("3. Exhaustion:");
    let pool = GenericObjectPool::new(
        FnFactory::new(|| Ok(42)),
        PoolConfiguration::new()
            .with_max_total(1)
            .with_when_exhausted(WhenExhaustedAction::Fail),
    )
    .unwrap();

    let held = pool.borrow_object().unwrap();
    match pool.borrow_object() {
        Err(PoolError::Exhausted) => println!("   Second borrow failed fast: pool exhausted"),
        other => println!("   Unexpected: {other:?}"),
    }

    drop(held);
    println!("   Borrow after return: {}\n", *pool.borrow_object().unwrap());
}

fn metrics() {
    println!("4. Metrics:");
    let pool = GenericObjectPool::new(
        FnFactory::new(|| Ok(vec![0u8; 16])),
        PoolConfiguration::default(),
    )
    .unwrap();

    for _ in 0..3 {
        let _buf = pool.borrow_object().unwrap();
    }

    let metrics = pool.metrics();
    println!("   Created: {}", metrics.created_count);
    println!("   Borrowed: {}", metrics.borrowed_count);
    println!("   Returned: {}", metrics.returned_count);
    println!("   Mean borrow wait: {:?}", metrics.mean_borrow_wait_time);
    println!("   Created at: {}", pool.creation_trace());
}
