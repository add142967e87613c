use tokio::sync::Mutex;

/// Leader-side list of follower endpoints (`host:port`).
///
/// Grows through REGISTER and never shrinks: a follower that goes away stays
/// listed and keeps failing replication until the leader restarts.
#[derive(Debug, Default)]
pub struct FollowerRegistry {
    followers: Mutex<Vec<String>>,
}

impl FollowerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with statically configured followers.
    pub fn with_followers<I>(followers: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut seeded: Vec<String> = Vec::new();
        for endpoint in followers {
            if !seeded.contains(&endpoint) {
                seeded.push(endpoint);
            }
        }
        Self {
            followers: Mutex::new(seeded),
        }
    }

    /// Adds `endpoint` unless it is already known. Returns `true` when added.
    pub async fn register(&self, endpoint: &str) -> bool {
        let mut followers = self.followers.lock().await;
        if followers.iter().any(|known| known == endpoint) {
            return false;
        }
        followers.push(endpoint.to_string());
        true
    }

    /// Copy of the current list, taken before a replication fan-out so that
    /// concurrent registrations never disturb the iteration.
    pub async fn snapshot(&self) -> Vec<String> {
        self.followers.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.followers.lock().await.len()
    }
}
