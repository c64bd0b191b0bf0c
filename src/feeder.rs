//! Sliding-window fan-out of streamed samples to independent subscribers.

use crate::error::FeederError;
use crate::protocol::Sample;
use log::warn;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

/// How many buffered samples a subscription needs before a delivery, and how
/// many are discarded from the front of its buffer afterwards.
///
/// `window >= slide >= 1` is enforced at registration. With `slide < window`
/// consecutive deliveries overlap by `window - slide` samples; with
/// `slide == window` they are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionParams {
    pub window: usize,
    pub slide: usize,
}

impl SubscriptionParams {
    pub fn new(window: usize, slide: usize) -> Self {
        Self { window, slide }
    }
}

/// Receives exactly-windowed batches, tagged with the producing source.
pub trait DataListener: Send + Sync {
    fn on_data(&self, source: &str, samples: Vec<Sample>);
}

impl<F> DataListener for F
where
    F: Fn(&str, Vec<Sample>) + Send + Sync,
{
    fn on_data(&self, source: &str, samples: Vec<Sample>) {
        self(source, samples)
    }
}

struct Subscription {
    params: SubscriptionParams,
    listener: Arc<dyn DataListener>,
    // Touched only by the dispatch worker once samples are handed off.
    buffer: Mutex<VecDeque<Sample>>,
    one_shot: bool,
}

struct Dispatch {
    source: String,
    samples: Vec<Sample>,
    targets: Vec<(String, Arc<Subscription>)>,
}

struct Shared {
    subscriptions: Mutex<BTreeMap<String, Arc<Subscription>>>,
    worker: mpsc::UnboundedSender<Dispatch>,
}

/// Buffers incoming batches per subscriber and delivers windows on a single
/// dedicated worker task, so delivery order is deterministic per source.
///
/// Cloning is cheap and every clone feeds the same subscriber set.
#[derive(Clone)]
pub struct SlidingWindowFeeder {
    shared: Arc<Shared>,
}

impl SlidingWindowFeeder {
    /// Spawns the dispatch worker; call inside a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            subscriptions: Mutex::new(BTreeMap::new()),
            worker: tx,
        });
        tokio::spawn(dispatch_worker(rx, Arc::downgrade(&shared)));
        Self { shared }
    }

    /// Register a named subscription. The name must be unique; re-using one
    /// fails without touching the existing subscription.
    pub fn register_listener(
        &self,
        name: &str,
        listener: impl DataListener + 'static,
        params: SubscriptionParams,
    ) -> Result<(), FeederError> {
        self.insert(name, Arc::new(listener), params, false)
    }

    /// Deliver a single window, then forget the subscription. It removes
    /// itself right before its one callback fires. Returns the generated
    /// subscription name.
    pub fn listen_once(
        &self,
        listener: impl DataListener + 'static,
        window: usize,
    ) -> Result<String, FeederError> {
        let name = Uuid::new_v4().to_string();
        self.insert(
            &name,
            Arc::new(listener),
            SubscriptionParams::new(window, window),
            true,
        )?;
        Ok(name)
    }

    /// Removing an unknown name is not an error.
    pub fn remove_listener(&self, name: &str) {
        self.shared.subscriptions.lock().remove(name);
    }

    /// Largest window across current subscriptions, 1 when there are none.
    pub fn max_window(&self) -> usize {
        self.shared
            .subscriptions
            .lock()
            .values()
            .map(|s| s.params.window)
            .max()
            .unwrap_or(1)
    }

    /// Fan a batch from `source` into every subscription registered at this
    /// instant, then schedule the windowing scan on the worker. Listeners
    /// registered after this call never see this batch.
    pub fn on_data(&self, source: &str, samples: Vec<Sample>) {
        let targets: Vec<(String, Arc<Subscription>)> = self
            .shared
            .subscriptions
            .lock()
            .iter()
            .map(|(name, sub)| (name.clone(), sub.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }
        let _ = self.shared.worker.send(Dispatch {
            source: source.to_string(),
            samples,
            targets,
        });
    }

    fn insert(
        &self,
        name: &str,
        listener: Arc<dyn DataListener>,
        params: SubscriptionParams,
        one_shot: bool,
    ) -> Result<(), FeederError> {
        if params.slide < 1 || params.window < params.slide {
            return Err(FeederError::InvalidSubscription {
                name: name.to_string(),
                window: params.window,
                slide: params.slide,
            });
        }
        let mut subscriptions = self.shared.subscriptions.lock();
        if subscriptions.contains_key(name) {
            return Err(FeederError::DuplicateSubscription(name.to_string()));
        }
        subscriptions.insert(
            name.to_string(),
            Arc::new(Subscription {
                params,
                listener,
                buffer: Mutex::new(VecDeque::new()),
                one_shot,
            }),
        );
        Ok(())
    }
}

impl Default for SlidingWindowFeeder {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_worker(mut rx: mpsc::UnboundedReceiver<Dispatch>, shared: Weak<Shared>) {
    while let Some(job) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        for (name, sub) in &job.targets {
            let mut buffer = sub.buffer.lock();
            buffer.extend(job.samples.iter().cloned());

            while buffer.len() >= sub.params.window {
                // A subscription removed or replaced since the snapshot no
                // longer gets deliveries; its buffered samples go with it.
                let live = shared
                    .subscriptions
                    .lock()
                    .get(name)
                    .map_or(false, |current| Arc::ptr_eq(current, sub));
                if !live {
                    break;
                }
                if sub.one_shot {
                    shared.subscriptions.lock().remove(name);
                }

                let window: Vec<Sample> = buffer.iter().take(sub.params.window).cloned().collect();
                buffer.drain(..sub.params.slide);

                let delivery = catch_unwind(AssertUnwindSafe(|| {
                    sub.listener.on_data(&job.source, window)
                }));
                if let Err(payload) = delivery {
                    warn!(
                        "subscriber `{name}` failed during delivery: {}",
                        panic_message(&payload)
                    );
                }
                if sub.one_shot {
                    break;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Deliveries = Arc<Mutex<Vec<(String, Vec<Sample>)>>>;

    fn recorder() -> (Deliveries, impl DataListener + 'static) {
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let sink = deliveries.clone();
        let listener = move |source: &str, samples: Vec<Sample>| {
            sink.lock().push((source.to_string(), samples));
        };
        (deliveries, listener)
    }

    fn sample(value: f32) -> Sample {
        vec![value; 2]
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached within 1 s");
    }

    #[tokio::test]
    async fn overlapping_windows_slide_one() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("overlap", listener, SubscriptionParams::new(3, 1))
            .unwrap();

        for i in 0..6 {
            feeder.on_data("band", vec![sample(i as f32)]);
        }
        wait_for(|| deliveries.lock().len() == 4).await;

        let got = deliveries.lock().clone();
        let windows: Vec<Vec<f32>> = got
            .iter()
            .map(|(_, samples)| samples.iter().map(|s| s[0]).collect())
            .collect();
        assert_eq!(
            windows,
            vec![
                vec![0.0, 1.0, 2.0],
                vec![1.0, 2.0, 3.0],
                vec![2.0, 3.0, 4.0],
                vec![3.0, 4.0, 5.0],
            ]
        );
        assert!(got.iter().all(|(source, _)| source == "band"));
    }

    #[tokio::test]
    async fn disjoint_windows_slide_equals_window() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("disjoint", listener, SubscriptionParams::new(2, 2))
            .unwrap();

        for i in 0..4 {
            feeder.on_data("band", vec![sample(i as f32)]);
        }
        wait_for(|| deliveries.lock().len() == 2).await;

        let got = deliveries.lock().clone();
        let windows: Vec<Vec<f32>> = got
            .iter()
            .map(|(_, samples)| samples.iter().map(|s| s[0]).collect())
            .collect();
        assert_eq!(windows, vec![vec![0.0, 1.0], vec![2.0, 3.0]]);
    }

    #[tokio::test]
    async fn multi_sample_batches_fill_windows() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("batched", listener, SubscriptionParams::new(4, 4))
            .unwrap();

        feeder.on_data("band", vec![sample(0.0), sample(1.0)]);
        feeder.on_data("band", vec![sample(2.0), sample(3.0)]);
        wait_for(|| deliveries.lock().len() == 1).await;

        let got = deliveries.lock().clone();
        assert_eq!(got[0].1.len(), 4);
    }

    #[tokio::test]
    async fn listen_once_delivers_exactly_once_and_unregisters() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        let name = feeder.listen_once(listener, 2).unwrap();

        for i in 0..5 {
            feeder.on_data("band", vec![sample(i as f32)]);
        }
        wait_for(|| !deliveries.lock().is_empty()).await;
        // Give the worker room to (wrongly) deliver again.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = deliveries.lock().clone();
        assert_eq!(got.len(), 1);
        let values: Vec<f32> = got[0].1.iter().map(|s| s[0]).collect();
        assert_eq!(values, vec![0.0, 1.0]);
        // The name is free again, so the subscription is really gone.
        assert!(feeder
            .register_listener(&name, |_: &str, _: Vec<Sample>| {}, SubscriptionParams::new(1, 1))
            .is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_original_buffer() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("dup", listener, SubscriptionParams::new(2, 2))
            .unwrap();

        // Half a window buffered, then a rejected re-registration.
        feeder.on_data("band", vec![sample(0.0)]);
        assert_eq!(
            feeder.register_listener("dup", |_: &str, _: Vec<Sample>| {}, SubscriptionParams::new(1, 1)),
            Err(FeederError::DuplicateSubscription("dup".into()))
        );

        // The original buffer still counts the first sample.
        feeder.on_data("band", vec![sample(1.0)]);
        wait_for(|| deliveries.lock().len() == 1).await;
        let values: Vec<f32> = deliveries.lock()[0].1.iter().map(|s| s[0]).collect();
        assert_eq!(values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn rejects_slide_larger_than_window_and_zero_slide() {
        let feeder = SlidingWindowFeeder::new();
        assert!(matches!(
            feeder.register_listener(
                "bad",
                |_: &str, _: Vec<Sample>| {},
                SubscriptionParams::new(2, 3)
            ),
            Err(FeederError::InvalidSubscription { window: 2, slide: 3, .. })
        ));
        assert!(matches!(
            feeder.register_listener(
                "bad",
                |_: &str, _: Vec<Sample>| {},
                SubscriptionParams::new(1, 0)
            ),
            Err(FeederError::InvalidSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let feeder = SlidingWindowFeeder::new();
        feeder
            .register_listener(
                "angry",
                |_: &str, _: Vec<Sample>| panic!("listener exploded"),
                SubscriptionParams::new(1, 1),
            )
            .unwrap();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("calm", listener, SubscriptionParams::new(1, 1))
            .unwrap();

        feeder.on_data("band", vec![sample(7.0)]);
        wait_for(|| deliveries.lock().len() == 1).await;
        assert_eq!(deliveries.lock()[0].1[0][0], 7.0);
    }

    #[tokio::test]
    async fn removal_is_idempotent_and_ends_deliveries() {
        let feeder = SlidingWindowFeeder::new();
        let (deliveries, listener) = recorder();
        feeder
            .register_listener("gone", listener, SubscriptionParams::new(1, 1))
            .unwrap();
        feeder.on_data("band", vec![sample(1.0)]);
        wait_for(|| deliveries.lock().len() == 1).await;

        feeder.remove_listener("gone");
        feeder.remove_listener("gone");
        feeder.on_data("band", vec![sample(2.0)]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(deliveries.lock().len(), 1);
    }

    #[tokio::test]
    async fn max_window_tracks_registrations() {
        let feeder = SlidingWindowFeeder::new();
        assert_eq!(feeder.max_window(), 1);
        feeder
            .register_listener("a", |_: &str, _: Vec<Sample>| {}, SubscriptionParams::new(5, 2))
            .unwrap();
        feeder
            .register_listener("b", |_: &str, _: Vec<Sample>| {}, SubscriptionParams::new(3, 3))
            .unwrap();
        assert_eq!(feeder.max_window(), 5);
        feeder.remove_listener("a");
        assert_eq!(feeder.max_window(), 3);
    }
}
