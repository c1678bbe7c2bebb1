//! Common test utilities and shared organizational hierarchy

#![allow(dead_code)]

use serde_json::{json, Value};
use sovereign_engine::domain::KeyValueStore;
use sovereign_engine::infra::memory::{InMemoryBackend, InMemorySessionStore};
use sovereign_engine::{CallerProfile, Config, SovereignEngine};
use std::sync::Arc;
use uuid::Uuid;

pub const EXPORT_RPC: &str = "export_entity_rows";

/// Realistic organizational hierarchy for testing
/// Brand → Sectors (North, South) → Areas → Branches
#[derive(Debug, Clone)]
pub struct TestOrgHierarchy {
    pub brand: Uuid,
    pub sector_north: Uuid,
    pub sector_south: Uuid,
    pub area_lisbon: Uuid,
    pub area_porto: Uuid,
    pub area_faro: Uuid,
    pub branch_lisbon_downtown: Uuid,
    pub branch_lisbon_airport: Uuid,
    pub branch_porto_center: Uuid,
    pub branch_faro_marina: Uuid,
}

impl TestOrgHierarchy {
    /// Create a new hierarchy with fresh UUIDs
    pub fn new() -> Self {
        Self {
            brand: Uuid::new_v4(),
            sector_north: Uuid::new_v4(),
            sector_south: Uuid::new_v4(),
            area_lisbon: Uuid::new_v4(),
            area_porto: Uuid::new_v4(),
            area_faro: Uuid::new_v4(),
            branch_lisbon_downtown: Uuid::new_v4(),
            branch_lisbon_airport: Uuid::new_v4(),
            branch_porto_center: Uuid::new_v4(),
            branch_faro_marina: Uuid::new_v4(),
        }
    }

    pub fn branches(&self) -> [Uuid; 4] {
        [
            self.branch_lisbon_downtown,
            self.branch_lisbon_airport,
            self.branch_porto_center,
            self.branch_faro_marina,
        ]
    }

    /// Area of each branch
    pub fn area_of(&self, branch: Uuid) -> Uuid {
        if branch == self.branch_porto_center {
            self.area_porto
        } else if branch == self.branch_faro_marina {
            self.area_faro
        } else {
            self.area_lisbon
        }
    }

    /// Seed brands, sectors, areas and branches
    pub fn seed(&self, backend: &InMemoryBackend) {
        backend.seed(
            "brands",
            [json!({"id": self.brand.to_string(), "name": "Sovereign Retail"})],
        );
        backend.seed(
            "sectors",
            [
                json!({"id": self.sector_north.to_string(), "name": "North", "brand_id": self.brand.to_string()}),
                json!({"id": self.sector_south.to_string(), "name": "South", "brand_id": self.brand.to_string()}),
            ],
        );
        backend.seed(
            "areas",
            [
                json!({"id": self.area_lisbon.to_string(), "name": "Lisbon", "sector_id": self.sector_north.to_string()}),
                json!({"id": self.area_porto.to_string(), "name": "Porto", "sector_id": self.sector_north.to_string()}),
                json!({"id": self.area_faro.to_string(), "name": "Faro", "sector_id": self.sector_south.to_string()}),
            ],
        );
        backend.seed(
            "branches",
            [
                (self.branch_lisbon_downtown, "Lisbon Downtown"),
                (self.branch_lisbon_airport, "Lisbon Airport"),
                (self.branch_porto_center, "Porto Center"),
                (self.branch_faro_marina, "Faro Marina"),
            ]
            .map(|(id, name)| {
                json!({
                    "id": id.to_string(),
                    "name": name,
                    "area_id": self.area_of(id).to_string(),
                    "is_active": true,
                    "is_deleted": false,
                })
            }),
        );
        backend.link("ticket_comments", "tickets", "ticket_id");
    }

    pub fn branch_manager(&self, branch: Uuid) -> CallerProfile {
        CallerProfile::new(Uuid::new_v4(), "branch_manager")
            .with_brand(self.brand)
            .with_area(self.area_of(branch))
            .with_branch(branch)
    }

    pub fn area_manager(&self, area: Uuid) -> CallerProfile {
        CallerProfile::new(Uuid::new_v4(), "area_manager")
            .with_brand(self.brand)
            .with_area(area)
    }

    pub fn sector_manager(&self, sector: Uuid) -> CallerProfile {
        CallerProfile::new(Uuid::new_v4(), "sector_manager")
            .with_brand(self.brand)
            .with_sector(sector)
    }

    pub fn brand_manager(&self) -> CallerProfile {
        CallerProfile::new(Uuid::new_v4(), "brand_manager").with_brand(self.brand)
    }

    pub fn admin(&self) -> CallerProfile {
        CallerProfile::new(Uuid::new_v4(), "admin")
    }
}

impl Default for TestOrgHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticket row; `sequence` orders `created_at` (higher is newer)
pub fn ticket(branch: Uuid, sequence: u32, status: &str) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "title": format!("Ticket {sequence}"),
        "branch_id": branch.to_string(),
        "status": status,
        "priority": if sequence % 10 == 0 { "urgent" } else { "medium" },
        "created_at": created_at(sequence),
        "is_deleted": false,
    })
}

pub fn created_at(sequence: u32) -> String {
    let base = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_default();
    (base + chrono::Duration::minutes(i64::from(sequence))).to_rfc3339()
}

/// `count` open tickets in `branch`, sequences starting at `first`
pub fn tickets(branch: Uuid, first: u32, count: u32) -> Vec<Value> {
    (first..first + count)
        .map(|sequence| ticket(branch, sequence, "open"))
        .collect()
}

pub struct TestEngine {
    pub org: TestOrgHierarchy,
    pub backend: Arc<InMemoryBackend>,
    pub store: Arc<InMemorySessionStore>,
    pub engine: SovereignEngine,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let org = TestOrgHierarchy::new();
        let backend = Arc::new(InMemoryBackend::new().with_export_rpc(&config.export_rpc));
        org.seed(&backend);
        let store = Arc::new(InMemorySessionStore::new());
        let engine = SovereignEngine::standard(
            config,
            backend.clone(),
            store.clone() as Arc<dyn KeyValueStore>,
        )
        .unwrap();
        Self {
            org,
            backend,
            store,
            engine,
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn print_test_header(test_name: &str, purpose: &[&str]) {
    println!("\n🧪 TEST: {}", test_name);
    if let Some(first) = purpose.first() {
        println!("📋 PURPOSE: {}", first);
    }
    for line in purpose.iter().skip(1) {
        println!("   {}", line);
    }
}

pub fn ids(rows: &[sovereign_engine::Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}
