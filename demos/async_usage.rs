//! Async usage examples

use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration, PoolError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    println!("=== Esox GenericObjectPool - Async Examples ===\n");

    // Example 1: Async borrow
    async_borrow().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Warm-up
    warmup().await;

    // Example 4: Concurrent access
    concurrent_access().await;
}

async fn async_borrow() {
    println!("1. Async Borrow:");
    let pool = GenericObjectPool::new(FnFactory::new(|| Ok(7u32)), PoolConfiguration::default())
        .unwrap();

    {
        let obj = pool.borrow_object_async().await.unwrap();
        println!("   Got object asynchronously: {}", *obj);
    }

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");

    let config = PoolConfiguration::new()
        .with_max_total(1)
        .with_max_wait(Duration::from_millis(100));
    let pool = GenericObjectPool::new(FnFactory::new(|| Ok(42u32)), config).unwrap();

    // Take the only object
    let _obj = pool.borrow_object().unwrap();

    // Try to get another (should time out)
    match pool.borrow_object_async().await {
        Ok(_) => println!("   Got object"),
        Err(PoolError::Timeout(waited)) => println!("   Timed out after {waited:?}"),
        Err(e) => println!("   Error: {e}"),
    }

    println!();
}

async fn warmup() {
    println!("3. Warm-up:");

    let made = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&made);
    let factory = FnFactory::new(move || {
        // simulate an expensive connect
        std::thread::sleep(Duration::from_millis(10));
        Ok(counter.fetch_add(1, Ordering::SeqCst))
    });
    let pool = GenericObjectPool::new(factory, PoolConfiguration::new().with_min_idle(5)).unwrap();

    pool.prepare_pool_async().await.unwrap();
    println!("   Idle after warm-up: {}", pool.num_idle());
    println!("   Objects made: {}\n", made.load(Ordering::SeqCst));
}

async fn concurrent_access() {
    println!("4. Concurrent Access:");

    let pool = GenericObjectPool::new(
        FnFactory::new(|| Ok(String::from("session"))),
        PoolConfiguration::new().with_max_total(3),
    )
    .unwrap();

    let mut handles = vec![];
    for i in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let obj = pool.borrow_object_async().await.unwrap();
            sleep(Duration::from_millis(10)).await;
            println!("   Task {i} used {}", obj.id());
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = pool.metrics();
    println!(
        "   Borrowed {} times using {} objects\n",
        metrics.borrowed_count, metrics.created_count
    );
}
