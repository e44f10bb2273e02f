use ahash::AHashMap;

/// The user a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOwner {
    /// Stable identifier, used for ownership filtering and backup
    /// grouping.
    pub id: String,
    /// Display name.
    pub pseudo: String,
    /// Free-form attributes persisted alongside the owner.
    pub data: AHashMap<String, String>,
}

impl JobOwner {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        JobOwner {
            pseudo: id.clone(),
            id,
            data: AHashMap::new(),
        }
    }

    pub fn with_pseudo(mut self, pseudo: impl Into<String>) -> Self {
        self.pseudo = pseudo.into();
        self
    }
}

/// The transport-side request attributes user identification may draw
/// from. The HTTP surface fills this in; the core only carries it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: AHashMap<String, String>,
    pub remote_addr: Option<String>,
}

/// Collaborator deciding who a request belongs to, and rebuilding owners
/// from a backup document.
pub trait UserIdentifier: Send + Sync {
    /// `None` means anonymous.
    fn identify(&self, context: &RequestContext) -> Option<JobOwner>;

    fn restore(&self, id: &str, pseudo: &str, data: &AHashMap<String, String>) -> JobOwner {
        JobOwner {
            id: id.to_string(),
            pseudo: pseudo.to_string(),
            data: data.clone(),
        }
    }
}
