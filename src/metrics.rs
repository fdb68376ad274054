//! Metrics snapshot and export for object pools

use std::collections::HashMap;
use std::time::Duration;

/// Point-in-time view of a pool's counters and timing statistics
///
/// # Examples
///
/// ```
/// use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration};
///
/// let pool = GenericObjectPool::new(FnFactory::new(|| Ok(42u32)), PoolConfiguration::default()).unwrap();
///
/// {
///     let _obj = pool.borrow_object().unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.borrowed_count, 1);
///     assert_eq!(metrics.num_active, 1);
/// }
///
/// assert_eq!(pool.metrics().returned_count, 1);
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Objects currently on loan
    pub num_active: usize,

    /// Objects currently idle
    pub num_idle: usize,

    /// Borrowers blocked waiting for an object
    pub num_waiters: usize,

    /// Configured cap on live objects, `None` when unbounded
    pub max_total: Option<usize>,

    pub created_count: u64,
    pub destroyed_count: u64,
    pub destroyed_by_evictor_count: u64,
    pub destroyed_by_borrow_validation_count: u64,
    pub borrowed_count: u64,
    pub returned_count: u64,

    /// Mean time on loan over the last returns
    pub mean_active_time: Duration,

    /// Mean time spent idle before being borrowed, over the last borrows
    pub mean_idle_time: Duration,

    /// Mean time borrowers waited, over the last borrows
    pub mean_borrow_wait_time: Duration,

    /// Longest time any borrower has waited
    pub max_borrow_wait_time: Duration,
}

impl PoolMetrics {
    /// Fraction of `max_total` on loan, 0.0 for unbounded pools
    pub fn utilization(&self) -> f64 {
        match self.max_total {
            Some(max) if max > 0 => self.num_active as f64 / max as f64,
            _ => 0.0,
        }
    }

    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("num_active".to_string(), self.num_active.to_string());
        metrics.insert("num_idle".to_string(), self.num_idle.to_string());
        metrics.insert("num_waiters".to_string(), self.num_waiters.to_string());
        metrics.insert(
            "max_total".to_string(),
            self.max_total
                .map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        );
        metrics.insert("created_count".to_string(), self.created_count.to_string());
        metrics.insert("destroyed_count".to_string(), self.destroyed_count.to_string());
        metrics.insert(
            "destroyed_by_evictor_count".to_string(),
            self.destroyed_by_evictor_count.to_string(),
        );
        metrics.insert(
            "destroyed_by_borrow_validation_count".to_string(),
            self.destroyed_by_borrow_validation_count.to_string(),
        );
        metrics.insert("borrowed_count".to_string(), self.borrowed_count.to_string());
        metrics.insert("returned_count".to_string(), self.returned_count.to_string());
        metrics.insert(
            "mean_active_time_ms".to_string(),
            self.mean_active_time.as_millis().to_string(),
        );
        metrics.insert(
            "mean_idle_time_ms".to_string(),
            self.mean_idle_time.as_millis().to_string(),
        );
        metrics.insert(
            "mean_borrow_wait_time_ms".to_string(),
            self.mean_borrow_wait_time.as_millis().to_string(),
        );
        metrics.insert(
            "max_borrow_wait_time_ms".to_string(),
            self.max_borrow_wait_time.as_millis().to_string(),
        );
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization()));
        metrics
    }
}

#[cfg(feature = "metrics")]
pub use self::prometheus_export::{MetricsExporter, PoolCollector};

#[cfg(feature = "metrics")]
mod prometheus_export {
    use super::PoolMetrics;
    use prometheus::core::{Collector, Desc};
    use prometheus::proto::MetricFamily;
    use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
    use std::collections::HashMap;
    use std::time::Duration;

    type GaugeReading = fn(&PoolMetrics) -> i64;
    type CounterReading = fn(&PoolMetrics) -> u64;

    fn millis(d: Duration) -> i64 {
        i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
    }

    fn count(n: usize) -> i64 {
        i64::try_from(n).unwrap_or(i64::MAX)
    }

    const GAUGES: &[(&str, &str, GaugeReading)] = &[
        ("genericpool_objects_active", "Objects currently on loan", |m: &PoolMetrics| count(m.num_active)),
        ("genericpool_objects_idle", "Objects currently idle", |m: &PoolMetrics| count(m.num_idle)),
        ("genericpool_waiters", "Borrowers blocked waiting for an object", |m: &PoolMetrics| {
            count(m.num_waiters)
        }),
        ("genericpool_max_total", "Cap on live objects, -1 when unbounded", |m: &PoolMetrics| {
            m.max_total.map_or(-1, count)
        }),
        ("genericpool_mean_active_time_ms", "Mean time on loan", |m: &PoolMetrics| {
            millis(m.mean_active_time)
        }),
        ("genericpool_mean_idle_time_ms", "Mean idle time before borrow", |m: &PoolMetrics| {
            millis(m.mean_idle_time)
        }),
        ("genericpool_mean_borrow_wait_ms", "Mean borrow wait", |m: &PoolMetrics| {
            millis(m.mean_borrow_wait_time)
        }),
        ("genericpool_max_borrow_wait_ms", "Longest borrow wait", |m: &PoolMetrics| {
            millis(m.max_borrow_wait_time)
        }),
    ];

    const COUNTERS: &[(&str, &str, CounterReading)] = &[
        ("genericpool_created_total", "Objects created", |m: &PoolMetrics| m.created_count),
        ("genericpool_destroyed_total", "Objects destroyed", |m: &PoolMetrics| m.destroyed_count),
        ("genericpool_destroyed_by_evictor_total", "Objects destroyed by the evictor", |m: &PoolMetrics| {
            m.destroyed_by_evictor_count
        }),
        (
            "genericpool_destroyed_by_borrow_validation_total",
            "Objects destroyed after failing validation on borrow",
            |m: &PoolMetrics| m.destroyed_by_borrow_validation_count,
        ),
        ("genericpool_borrowed_total", "Successful borrows", |m: &PoolMetrics| m.borrowed_count),
        ("genericpool_returned_total", "Returns", |m: &PoolMetrics| m.returned_count),
    ];

    /// Prometheus collector that reads a fresh snapshot on every scrape.
    ///
    /// Register it with any [`prometheus::Registry`]; see
    /// [`GenericObjectPool::metrics_collector`](crate::GenericObjectPool::metrics_collector).
    pub struct PoolCollector {
        snapshot: Box<dyn Fn() -> PoolMetrics + Send + Sync>,
        gauges: Vec<(IntGauge, GaugeReading)>,
        counters: Vec<(IntCounter, CounterReading)>,
    }

    impl PoolCollector {
        pub fn new<S>(
            pool_name: &str,
            tags: Option<&HashMap<String, String>>,
            snapshot: S,
        ) -> prometheus::Result<Self>
        where
            S: Fn() -> PoolMetrics + Send + Sync + 'static,
        {
            let opts = |name: &str, help: &str| {
                let mut opts = Opts::new(name, help).const_label("pool", pool_name);
                if let Some(tags) = tags {
                    for (key, value) in tags {
                        opts = opts.const_label(key.as_str(), value.as_str());
                    }
                }
                opts
            };

            let gauges = GAUGES
                .iter()
                .map(|(name, help, read)| Ok((IntGauge::with_opts(opts(*name, *help))?, *read)))
                .collect::<prometheus::Result<Vec<_>>>()?;
            let counters = COUNTERS
                .iter()
                .map(|(name, help, read)| Ok((IntCounter::with_opts(opts(*name, *help))?, *read)))
                .collect::<prometheus::Result<Vec<_>>>()?;

            Ok(Self {
                snapshot: Box::new(snapshot),
                gauges,
                counters,
            })
        }
    }

    impl Collector for PoolCollector {
        fn desc(&self) -> Vec<&Desc> {
            self.gauges
                .iter()
                .flat_map(|(gauge, _)| gauge.desc())
                .chain(self.counters.iter().flat_map(|(counter, _)| counter.desc()))
                .collect()
        }

        fn collect(&self) -> Vec<MetricFamily> {
            let metrics = (self.snapshot)();
            let mut families = Vec::with_capacity(self.gauges.len() + self.counters.len());
            for (gauge, read) in &self.gauges {
                gauge.set(read(&metrics));
                families.extend(gauge.collect());
            }
            for (counter, read) in &self.counters {
                counter.reset();
                counter.inc_by(read(&metrics));
                families.extend(counter.collect());
            }
            families
        }
    }

    /// Metrics exporter for Prometheus format
    pub struct MetricsExporter;

    impl MetricsExporter {
        /// Render a snapshot in the Prometheus text exposition format
        ///
        /// # Examples
        ///
        /// ```
        /// use esox_genericpool::{FnFactory, GenericObjectPool, PoolConfiguration};
        /// use std::collections::HashMap;
        ///
        /// let pool = GenericObjectPool::new(FnFactory::new(|| Ok(1u8)), PoolConfiguration::default()).unwrap();
        ///
        /// let mut tags = HashMap::new();
        /// tags.insert("service".to_string(), "api".to_string());
        ///
        /// let output = pool.export_metrics_prometheus("my_pool", Some(&tags)).unwrap();
        /// assert!(output.contains("genericpool_objects_active"));
        /// assert!(output.contains("service=\"api\""));
        /// ```
        pub fn export_prometheus(
            metrics: &PoolMetrics,
            pool_name: &str,
            tags: Option<&HashMap<String, String>>,
        ) -> prometheus::Result<String> {
            let snapshot = metrics.clone();
            let collector = PoolCollector::new(pool_name, tags, move || snapshot.clone())?;

            let registry = Registry::new();
            registry.register(Box::new(collector))?;

            let mut buffer = Vec::new();
            TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
            String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolMetrics {
        PoolMetrics {
            num_active: 2,
            num_idle: 3,
            max_total: Some(8),
            created_count: 5,
            borrowed_count: 12,
            returned_count: 10,
            mean_active_time: Duration::from_millis(15),
            ..Default::default()
        }
    }

    #[test]
    fn test_utilization() {
        assert_eq!(sample().utilization(), 0.25);
        let unbounded = PoolMetrics {
            max_total: None,
            ..sample()
        };
        assert_eq!(unbounded.utilization(), 0.0);
    }

    #[test]
    fn test_export_map() {
        let exported = sample().export();
        assert_eq!(exported["num_active"], "2");
        assert_eq!(exported["borrowed_count"], "12");
        assert_eq!(exported["mean_active_time_ms"], "15");
        assert_eq!(exported["utilization"], "0.25");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_text() {
        let output = MetricsExporter::export_prometheus(&sample(), "db", None).unwrap();
        assert!(output.contains("# TYPE genericpool_objects_active gauge"));
        assert!(output.contains("genericpool_objects_active{pool=\"db\"} 2"));
        assert!(output.contains("# TYPE genericpool_borrowed_total counter"));
        assert!(output.contains("genericpool_borrowed_total{pool=\"db\"} 12"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_collector_reads_fresh_snapshot() {
        use prometheus::Registry;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(1));
        let source = Arc::clone(&active);
        let collector = PoolCollector::new("live", None, move || PoolMetrics {
            num_active: source.load(Ordering::SeqCst),
            ..Default::default()
        })
        .unwrap();

        let registry = Registry::new();
        registry.register(Box::new(collector)).unwrap();

        let read = |registry: &Registry| {
            registry
                .gather()
                .into_iter()
                .find(|family| family.get_name() == "genericpool_objects_active")
                .map(|family| family.get_metric()[0].get_gauge().get_value())
        };
        assert_eq!(read(&registry), Some(1.0));
        active.store(4, Ordering::SeqCst);
        assert_eq!(read(&registry), Some(4.0));
    }
}
