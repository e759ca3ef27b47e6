//! Metrics collection and export for pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use ttlpool::{Pool, PoolConfiguration, Ttl};
///
/// let pool = Pool::new(PoolConfiguration::new(Ttl::Never).with_factory(|| Ok(5)));
///
/// let value = pool.get().unwrap();
/// pool.put(value).unwrap();
/// let _ = pool.get().unwrap();
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_created, 1);
/// assert_eq!(metrics.total_reused, 1);
/// assert_eq!(metrics.total_returned, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Values built by the factory
    pub total_created: usize,

    /// Gets served from pooled values
    pub total_reused: usize,

    /// Values accepted back by `put`
    pub total_returned: usize,

    /// Puts refused because the pool was closed
    pub rejected_returns: usize,

    /// Values found expired by `get` or the reaper
    pub total_expired: usize,

    /// Values discarded by the pool, through the destructor when one is set
    pub total_destroyed: usize,

    /// Values currently in the list, expired or not
    pub pooled_objects: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_reused".to_string(), self.total_reused.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("rejected_returns".to_string(), self.rejected_returns.to_string());
        metrics.insert("total_expired".to_string(), self.total_expired.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("pooled_objects".to_string(), self.pooled_objects.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use ttlpool::{MetricsExporter, Pool, PoolConfiguration, Ttl};
    /// use std::collections::HashMap;
    ///
    /// let pool: Pool<i32> = Pool::new(PoolConfiguration::new(Ttl::Never));
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "my_pool", Some(&tags));
    /// assert!(output.contains("ttlpool_objects_pooled"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        output.push_str("# HELP ttlpool_objects_pooled Values currently held by the pool\n");
        output.push_str("# TYPE ttlpool_objects_pooled gauge\n");
        output.push_str(&format!("ttlpool_objects_pooled{{{}}} {}\n", labels, metrics.pooled_objects));

        let counters = [
            ("ttlpool_objects_created_total", "Values built by the factory", metrics.total_created),
            ("ttlpool_objects_reused_total", "Gets served from the pool", metrics.total_reused),
            ("ttlpool_objects_returned_total", "Values returned to the pool", metrics.total_returned),
            ("ttlpool_returns_rejected_total", "Returns refused by a closed pool", metrics.rejected_returns),
            ("ttlpool_objects_expired_total", "Values that outlived their TTL", metrics.total_expired),
            ("ttlpool_objects_destroyed_total", "Values discarded by the pool", metrics.total_destroyed),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut sorted: Vec<_> = tags.iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub reused: AtomicUsize,
    pub returned: AtomicUsize,
    pub rejected: AtomicUsize,
    pub expired: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, pooled: usize) -> PoolMetrics {
        PoolMetrics {
            total_created: self.created.load(Ordering::Relaxed),
            total_reused: self.reused.load(Ordering::Relaxed),
            total_returned: self.returned.load(Ordering::Relaxed),
            rejected_returns: self.rejected.load(Ordering::Relaxed),
            total_expired: self.expired.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
            pooled_objects: pooled,
        }
    }
}
