use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub kind: String,
    pub state: JobState,
    /// Avancement grossier dans [0, 1].
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<String, JobStatus>,
    order: VecDeque<String>,
}

impl Jobs {
    fn update(&mut self, id: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(job) = self.by_id.get_mut(id) {
            f(job);
        }
    }

    /// Retire le plus ancien job terminé.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .order
            .iter()
            .position(|id| self.by_id.get(id).map(|j| j.state.is_finished()).unwrap_or(true));
        match victim {
            Some(pos) => {
                if let Some(id) = self.order.remove(pos) {
                    self.by_id.remove(&id);
                }
                true
            }
            None => false,
        }
    }
}

/// Poignée passée à la tâche pour publier son avancement.
#[derive(Clone)]
pub struct ProgressHandle {
    id: String,
    jobs: Arc<Mutex<Jobs>>,
}

impl ProgressHandle {
    pub fn set(&self, done: usize, total: usize) {
        let p = if total == 0 { 0.0 } else { (done as f64 / total as f64).clamp(0.0, 1.0) };
        self.jobs.lock().update(&self.id, |j| j.progress = p);
    }
}

/// Registre borné de tâches longues exécutées en arrière-plan.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<Jobs>>,
    capacity: usize,
}

impl JobRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Jobs::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn spawn<F>(&self, kind: &str, task: F) -> Result<String>
    where
        F: FnOnce(&ProgressHandle) -> std::result::Result<serde_json::Value, String> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        {
            let mut jobs = self.jobs.lock();
            while jobs.by_id.len() >= self.capacity {
                if !jobs.evict_one() {
                    return Err(EngineError::constraint(format!(
                        "{} jobs en cours, capacité atteinte",
                        jobs.by_id.len()
                    )));
                }
            }
            jobs.by_id.insert(
                id.clone(),
                JobStatus {
                    id: id.clone(),
                    kind: kind.to_string(),
                    state: JobState::Queued,
                    progress: 0.0,
                    created_at: Utc::now(),
                    finished_at: None,
                    result: None,
                    error: None,
                },
            );
            jobs.order.push_back(id.clone());
        }
        log::info!("Job {} ({}) en file", id, kind);

        let handle = ProgressHandle {
            id: id.clone(),
            jobs: Arc::clone(&self.jobs),
        };
        std::thread::spawn(move || {
            handle.jobs.lock().update(&handle.id, |j| j.state = JobState::Running);
            let outcome = task(&handle);
            let mut jobs = handle.jobs.lock();
            jobs.update(&handle.id, |j| {
                j.finished_at = Some(Utc::now());
                match outcome {
                    Ok(value) => {
                        j.state = JobState::Done;
                        j.progress = 1.0;
                        j.result = Some(value);
                    }
                    Err(message) => {
                        j.state = JobState::Error;
                        j.error = Some(message);
                    }
                }
            });
            log::info!("Job {} terminé", handle.id);
        });

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<JobStatus> {
        self.jobs.lock().by_id.get(id).cloned()
    }

    pub fn list(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock();
        jobs.order.iter().filter_map(|id| jobs.by_id.get(id).cloned()).collect()
    }

    /// Attend la fin d'un job par interrogation ; `None` si le délai expire
    /// ou si l'id est inconnu.
    pub fn wait(&self, id: &str, timeout: Duration, poll: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.get(id)?;
            if status.state.is_finished() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(10);
    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_job_done_with_result() {
        let registry = JobRegistry::new(4);
        let id = registry
            .spawn("bulk", |p| {
                p.set(1, 2);
                Ok(json!({"n": 3}))
            })
            .unwrap();
        let status = registry.wait(&id, WAIT, POLL).unwrap();
        assert_eq!(status.state, JobState::Done);
        assert_eq!(status.result, Some(json!({"n": 3})));
        assert!((status.progress - 1.0).abs() < 1e-12);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn test_job_error_recorded() {
        let registry = JobRegistry::new(4);
        let id = registry.spawn("bulk", |_| Err("NO_DATA".to_string())).unwrap();
        let status = registry.wait(&id, WAIT, POLL).unwrap();
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.error.as_deref(), Some("NO_DATA"));
    }

    #[test]
    fn test_unknown_id() {
        let registry = JobRegistry::new(2);
        assert!(registry.get("inconnu").is_none());
    }

    #[test]
    fn test_finished_jobs_evicted_first() {
        let registry = JobRegistry::new(2);
        let a = registry.spawn("a", |_| Ok(json!(1))).unwrap();
        registry.wait(&a, WAIT, POLL).unwrap();
        let b = registry.spawn("b", |_| Ok(json!(2))).unwrap();
        registry.wait(&b, WAIT, POLL).unwrap();
        let c = registry.spawn("c", |_| Ok(json!(3))).unwrap();
        assert!(registry.get(&a).is_none(), "le plus ancien terminé part");
        assert!(registry.get(&b).is_some());
        assert!(registry.get(&c).is_some());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_capacity_refused_when_all_running() {
        let registry = JobRegistry::new(1);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let id = registry
            .spawn("long", move |_| {
                let _ = rx.recv();
                Ok(json!(null))
            })
            .unwrap();
        assert!(registry.spawn("autre", |_| Ok(json!(null))).is_err());
        tx.send(()).unwrap();
        registry.wait(&id, WAIT, POLL).unwrap();
    }
}
