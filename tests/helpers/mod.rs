//! In-memory collaborators and HTTP helpers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use pet_tee::{
    models::task::{Task, TaskStatus},
    services::{
        generation::{GenerationError, ImageGenerator},
        queue::{QueueError, WorkQueue},
        storage::{ArtifactStore, StorageError},
        store::{StoreError, TaskStore},
        tasks::{TaskQueryService, TaskService},
    },
    worker::{TaskWorker, WorkerSettings},
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Smallest byte string `image::guess_format` recognises as PNG.
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

// ---------------------------------------------------------------------------
// Task store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    seq: AtomicI64,
    unavailable: AtomicBool,
    failing_writes: Mutex<HashSet<TaskStatus>>,
    finished_elsewhere_before: Mutex<HashSet<TaskStatus>>,
    writes: Mutex<Vec<(Uuid, TaskStatus, Option<String>)>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Seed a task directly, bypassing the create path.
    pub fn insert(&self, owner_id: Uuid, status: TaskStatus, image_uri: Option<&str>) -> Uuid {
        let task = self.new_task(owner_id, "cat", "MEOW");
        let id = task.id;
        self.tasks.lock().unwrap().insert(
            id,
            Task {
                status,
                image_uri: image_uri.map(str::to_string),
                ..task
            },
        );
        id
    }

    pub fn soft_delete(&self, id: Uuid) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.deleted_at = Some(Utc::now());
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every write of `status` fail as if the database were down.
    pub fn fail_writes_of(&self, status: TaskStatus) {
        self.failing_writes.lock().unwrap().insert(status);
    }

    /// Just before a write of `status`, let another worker finish the task
    /// as `DONE`, as a concurrent instance would.
    pub fn finish_elsewhere_before(&self, status: TaskStatus) {
        self.finished_elsewhere_before.lock().unwrap().insert(status);
    }

    /// Successful status writes, in order.
    pub fn writes(&self) -> Vec<(Uuid, TaskStatus, Option<String>)> {
        self.writes.lock().unwrap().clone()
    }

    fn new_task(&self, owner_id: Uuid, animal: &str, text: &str) -> Task {
        // Strictly increasing creation times keep newest-first ordering deterministic.
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        Task {
            id: Uuid::new_v4(),
            owner_id,
            status: TaskStatus::Created,
            animal: animal.to_string(),
            text: text.to_string(),
            image_uri: None,
            created_at: Utc::now() + chrono::Duration::milliseconds(seq),
            deleted_at: None,
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, owner_id: Uuid, animal: &str, text: &str) -> Result<Task, StoreError> {
        self.check_available()?;
        let task = self.new_task(owner_id, animal, text);
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.check_available()?;
        self.task(id).ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        image_uri: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        if self.failing_writes.lock().unwrap().contains(&status) {
            return Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
        }

        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if self.finished_elsewhere_before.lock().unwrap().contains(&status) {
            task.status = TaskStatus::Done;
            task.image_uri = Some(format!("store://elsewhere/{id}"));
        }
        if !task.status.can_transition_to(status) {
            return Err(StoreError::Conflict {
                id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        task.image_uri = image_uri.map(str::to_string);

        self.writes
            .lock()
            .unwrap()
            .push((id, status, image_uri.map(str::to_string)));
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Task>, StoreError> {
        self.check_available()?;
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.owner_id == owner_id && (include_deleted || !t.is_deleted()))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<String>>,
    processing: Mutex<Vec<String>>,
    enqueued: Mutex<Vec<Uuid>>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw entry as a producer would, without recording an enqueue.
    pub fn push_raw(&self, entry: &str) {
        self.pending.lock().unwrap().push_back(entry.to_string());
    }

    /// Pretend a previous consumer dequeued `entry` and died.
    pub fn push_in_flight(&self, entry: &str) {
        self.processing.lock().unwrap().push(entry.to_string());
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.processing.lock().unwrap().clone()
    }

    /// Every id passed to `enqueue`, in order.
    pub fn enqueued(&self) -> Vec<Uuid> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, task_id: Uuid) -> Result<(), QueueError> {
        self.check_available()?;
        self.enqueued.lock().unwrap().push(task_id);
        self.pending.lock().unwrap().push_back(task_id.to_string());
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        self.check_available()?;
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some(entry) => {
                self.processing.lock().unwrap().push(entry.clone());
                Ok(Some(entry))
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, entry: &str) -> Result<(), QueueError> {
        self.check_available()?;
        let mut processing = self.processing.lock().unwrap();
        if let Some(pos) = processing.iter().position(|e| e == entry) {
            processing.remove(pos);
        }
        Ok(())
    }

    async fn release(&self, entry: &str) -> Result<(), QueueError> {
        self.check_available()?;
        {
            let mut processing = self.processing.lock().unwrap();
            if let Some(pos) = processing.iter().position(|e| e == entry) {
                processing.remove(pos);
            }
        }
        self.pending.lock().unwrap().push_back(entry.to_string());
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        self.check_available()?;
        let recovered: Vec<String> = self.processing.lock().unwrap().drain(..).collect();
        let mut pending = self.pending.lock().unwrap();
        for entry in recovered.iter().rev() {
            pending.push_front(entry.clone());
        }
        Ok(recovered.len() as u64)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.check_available()?;
        Ok(self.pending.lock().unwrap().len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.check_available()
    }
}

// ---------------------------------------------------------------------------
// Generation client
// ---------------------------------------------------------------------------

pub struct FakeGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    /// Prompts containing any of these words fail.
    failing_words: Mutex<Vec<String>>,
    panics: AtomicBool,
    delay: Mutex<Duration>,
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            failing_words: Mutex::new(Vec::new()),
            panics: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when_prompt_mentions(&self, word: &str) {
        self.failing_words.lock().unwrap().push(word.to_string());
    }

    pub fn fail_always(&self) {
        self.fail_when_prompt_mentions("");
    }

    pub fn panic_on_call(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.panics.load(Ordering::SeqCst) {
            panic!("generator blew up");
        }

        let fails = self
            .failing_words
            .lock()
            .unwrap()
            .iter()
            .any(|w| prompt.contains(w.as_str()));
        if fails {
            return Err(GenerationError::Provider("NSFW content detected".to_string()));
        }

        Ok(PNG_BYTES.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Artifact store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeArtifactStore {
    fixed_locator: Mutex<Option<String>>,
    fails: AtomicBool,
    puts: Mutex<Vec<(Uuid, usize)>>,
}

impl FakeArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_return(&self, locator: &str) {
        *self.fixed_locator.lock().unwrap() = Some(locator.to_string());
    }

    pub fn fail_uploads(&self) {
        self.fails.store(true, Ordering::SeqCst);
    }

    /// `(task id, byte count)` for every successful put.
    pub fn puts(&self) -> Vec<(Uuid, usize)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn put(&self, task_id: Uuid, data: &[u8]) -> Result<String, StorageError> {
        if self.fails.load(Ordering::SeqCst) {
            return Err(StorageError::Status(503));
        }
        self.puts.lock().unwrap().push((task_id, data.len()));
        let locator = self
            .fixed_locator
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("store://{task_id}"));
        Ok(locator)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// One producer, one worker and their fakes, wired the way the binaries wire
/// the real adapters.
pub struct Harness {
    pub store: Arc<MemoryTaskStore>,
    pub queue: Arc<MemoryQueue>,
    pub generator: Arc<FakeGenerator>,
    pub artifacts: Arc<FakeArtifactStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryTaskStore::new()),
            queue: Arc::new(MemoryQueue::new()),
            generator: Arc::new(FakeGenerator::new()),
            artifacts: Arc::new(FakeArtifactStore::new()),
        }
    }

    pub fn service(&self) -> TaskService {
        TaskService::new(self.store.clone(), self.queue.clone())
    }

    pub fn queries(&self) -> TaskQueryService {
        TaskQueryService::new(self.store.clone())
    }

    pub fn worker(&self) -> TaskWorker {
        self.worker_with(fast_settings())
    }

    pub fn worker_with(&self, settings: WorkerSettings) -> TaskWorker {
        TaskWorker::new(
            self.store.clone(),
            self.queue.clone(),
            self.generator.clone(),
            self.artifacts.clone(),
            settings,
        )
    }
}

pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        dequeue_timeout: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Live deployment
// ---------------------------------------------------------------------------

/// Response envelope as seen by an HTTP client.
#[derive(Debug, serde::Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    pub data: Option<serde_json::Value>,
}

/// Create a task through POST /tasks/create
pub async fn create_task(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    animal: &str,
    text: &str,
) -> Result<Uuid, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/tasks/create", base_url))
        .bearer_auth(token)
        .json(&serde_json::json!({ "animal": animal, "text": text }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Create failed with status {}: {}", status, error_text).into());
    }

    let body = response.json::<Envelope>().await?;
    let task_id = body
        .data
        .and_then(|d| d.get("task_id").cloned())
        .ok_or("No task_id in response")?;
    Ok(serde_json::from_value(task_id)?)
}

/// Poll GET /tasks/{id} until the task is DONE or ERROR (with timeout)
pub async fn poll_task_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    task_id: Uuid,
    timeout_secs: u64,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/tasks/{}", base_url, task_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let task = response
            .json::<Envelope>()
            .await?
            .data
            .ok_or("No task in response")?;

        match task["status"].as_str() {
            Some("DONE") | Some("ERROR") => return Ok(task),
            Some("CREATED") | Some("IN_PROGRESS") => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown task status: {:?}", other).into()),
        }
    }

    Err(format!("Task did not finish within {} seconds", timeout_secs).into())
}
