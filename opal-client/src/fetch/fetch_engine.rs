/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Bounded worker pool executing data-update directives.

use super::FetchError;
use super::FetchErrorKind;
use super::FetchProviderRegistry;
use crate::conf::FetchConfig;
use crate::msg::DataSourceEntry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Duration;

/// Handle for one submitted directive. Awaiting tickets of the same
/// destination path in submission order serializes the writes for that path.
pub struct FetchTicket {
    rx: oneshot::Receiver<Result<serde_json::Value, FetchError>>,
}

impl FetchTicket {
    /// Await the directive's result.
    pub async fn await_result(self) -> Result<serde_json::Value, FetchError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(FetchErrorKind::Unspecified.error_with_msg("Fetch worker dropped the directive."))
        })
    }
}

/// One queued directive.
struct FetchJob {
    entry: DataSourceEntry,
    result_tx: oneshot::Sender<Result<serde_json::Value, FetchError>>,
}

/// Bounded worker pool of pluggable providers.
///
/// At most `worker_count` directives are in flight; the input queue is
/// bounded and enqueueing blocks (with timeout) when it is full, propagating
/// pressure to the caller.
pub struct FetchEngine {
    queue_tx: mpsc::Sender<FetchJob>,
    enqueue_timeout: Duration,
}

impl FetchEngine {
    /// Return a new instance and start its workers.
    pub fn new(fetch_config: &FetchConfig, registry: &Arc<FetchProviderRegistry>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(fetch_config.queue_size());
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let fetch_timeout = Duration::from_secs(fetch_config.fetch_timeout_seconds());
        for worker_id in 0..fetch_config.worker_count() {
            let queue_rx = Arc::clone(&queue_rx);
            let registry = Arc::clone(registry);
            tokio::spawn(async move {
                Self::worker_loop(worker_id, queue_rx, registry, fetch_timeout).await;
            });
        }
        Arc::new(Self {
            queue_tx,
            enqueue_timeout: Duration::from_secs(fetch_config.enqueue_timeout_seconds()),
        })
    }

    /// Submit a directive for execution.
    ///
    /// Directives carrying inline data resolve immediately without touching
    /// the queue or any provider.
    pub async fn submit(&self, entry: DataSourceEntry) -> Result<FetchTicket, FetchError> {
        let (result_tx, rx) = oneshot::channel();
        if let Some(data) = &entry.data {
            let _ = result_tx.send(Ok(data.clone()));
            return Ok(FetchTicket { rx });
        }
        self.queue_tx
            .send_timeout(FetchJob { entry, result_tx }, self.enqueue_timeout)
            .await
            .map_err(|e| {
                FetchErrorKind::QueueFull
                    .error_with_msg(format!("Unable to enqueue directive: {e}"))
            })?;
        Ok(FetchTicket { rx })
    }

    /// Dequeue and execute directives until the engine is dropped.
    async fn worker_loop(
        worker_id: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<FetchJob>>>,
        registry: Arc<FetchProviderRegistry>,
        fetch_timeout: Duration,
    ) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Fetch worker {worker_id} started.");
        }
        loop {
            let job = {
                let mut queue_rx = queue_rx.lock().await;
                queue_rx.recv().await
            };
            let Some(job) = job else {
                break;
            };
            let result = Self::execute(&registry, &job.entry, fetch_timeout).await;
            if let Err(e) = &result {
                log::info!("Directive for '{}' failed: {e}", &job.entry.url);
            }
            // The submitter may have been cancelled. Nothing to do then.
            let _ = job.result_tx.send(result);
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Fetch worker {worker_id} stopped.");
        }
    }

    /// Run one directive through its provider with guaranteed release.
    ///
    /// The timeout wraps only the fetch itself, never the release: a timer
    /// firing must not cancel the provider clean-up.
    async fn execute(
        registry: &FetchProviderRegistry,
        entry: &DataSourceEntry,
        fetch_timeout: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        let provider = registry.select(entry)?;
        provider.acquire().await?;
        let result = match tokio::time::timeout(
            fetch_timeout,
            provider.fetch(&entry.url, entry.config.as_ref()),
        )
        .await
        {
            Ok(Ok(raw)) => provider.process(raw, entry.config.as_ref()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FetchErrorKind::Timeout.error_with_msg(format!(
                "Directive for '{}' exceeded the fetch timeout.",
                &entry.url
            ))),
        };
        provider.release().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchProvider;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    /// Echoes the URL back as the fetched value and counts acquire/release
    /// pairs.
    struct EchoProvider {
        acquired: AtomicUsize,
        released: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl EchoProvider {
        fn new(fail: bool, delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                fail,
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl FetchProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn config_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn acquire(&self) -> Result<(), FetchError> {
            self.acquired.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn fetch(
            &self,
            url: &str,
            _config: Option<&serde_json::Value>,
        ) -> Result<Vec<u8>, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                Err(FetchErrorKind::SourceFailure.error())?;
            }
            Ok(format!("{{\"url\":\"{url}\"}}").into_bytes())
        }
        fn process(
            &self,
            raw: Vec<u8>,
            _config: Option<&serde_json::Value>,
        ) -> Result<serde_json::Value, FetchError> {
            serde_json::from_slice(&raw)
                .map_err(|e| FetchErrorKind::ProcessingFailure.error_with_msg(e.to_string()))
        }
        async fn release(&self) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn entry(url: &str, data: Option<serde_json::Value>) -> DataSourceEntry {
        DataSourceEntry {
            url: url.to_string(),
            config: Some(serde_json::json!({"fetcher": "echo"})),
            topics: vec![],
            dst_path: "/x".to_string(),
            save_method: Default::default(),
            data,
        }
    }

    fn fetch_config() -> FetchConfig {
        serde_json::from_str(
            r#"{"workercount":2,"queuesize":8,"fetchtimeoutseconds":5,"enqueuetimeoutseconds":1}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn directives_resolve_through_provider() {
        let registry = FetchProviderRegistry::new();
        let provider = EchoProvider::new(false, None);
        registry.register(Arc::clone(&provider) as Arc<dyn FetchProvider>);
        let engine = FetchEngine::new(&fetch_config(), &registry);
        let ticket = engine.submit(entry("echo://a", None)).await.unwrap();
        let value = ticket.await_result().await.unwrap();
        assert_eq!(value["url"], "echo://a");
        assert_eq!(provider.acquired.load(Ordering::Relaxed), 1);
        assert_eq!(provider.released.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn release_runs_on_failure_paths_too() {
        let registry = FetchProviderRegistry::new();
        let provider = EchoProvider::new(true, None);
        registry.register(Arc::clone(&provider) as Arc<dyn FetchProvider>);
        let engine = FetchEngine::new(&fetch_config(), &registry);
        let ticket = engine.submit(entry("echo://a", None)).await.unwrap();
        assert!(ticket.await_result().await.is_err());
        assert_eq!(provider.acquired.load(Ordering::Relaxed), 1);
        assert_eq!(provider.released.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn release_runs_when_the_fetch_times_out() {
        let registry = FetchProviderRegistry::new();
        // Parks in fetch far past the 5 second fetch timeout.
        let provider = EchoProvider::new(false, Some(Duration::from_secs(3_600)));
        registry.register(Arc::clone(&provider) as Arc<dyn FetchProvider>);
        let engine = FetchEngine::new(&fetch_config(), &registry);
        let ticket = engine.submit(entry("echo://slow", None)).await.unwrap();
        let result = ticket.await_result().await;
        match result {
            Err(e) => assert!(matches!(e.kind(), FetchErrorKind::Timeout)),
            Ok(value) => panic!("Expected a timeout, got {value:?}"),
        }
        // The timer firing cancels the fetch, never the clean-up.
        assert_eq!(provider.acquired.load(Ordering::Relaxed), 1);
        assert_eq!(provider.released.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn inline_data_bypasses_providers() {
        let registry = FetchProviderRegistry::new();
        let engine = FetchEngine::new(&fetch_config(), &registry);
        let ticket = engine
            .submit(entry("", Some(serde_json::json!({"inline": true}))))
            .await
            .unwrap();
        let value = ticket.await_result().await.unwrap();
        assert_eq!(value["inline"], true);
    }
}
