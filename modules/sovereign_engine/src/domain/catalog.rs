//! Standard entity catalog of the maintenance ERP

use crate::contract::{
    ActionDef, EntitySchema, FilterKind, FilterValue, MetricDef, RbacLevel, Relationship,
    SortSpec,
};

const MANAGERS: &[&str] = &["admin", "super_admin", "brand_manager", "sector_manager", "area_manager"];
const STAFF: &[&str] = &[
    "admin",
    "super_admin",
    "brand_manager",
    "sector_manager",
    "area_manager",
    "branch_manager",
    "technician",
];

fn select(options: &[&str]) -> FilterKind {
    FilterKind::Select {
        options: options.iter().map(|o| o.to_string()).collect(),
    }
}

pub fn standard_entities() -> Vec<EntitySchema> {
    vec![
        brands(),
        sectors(),
        areas(),
        branches(),
        profiles(),
        tickets(),
        ticket_comments(),
        ticket_categories(),
        assets(),
        maintenance_schedules(),
        inventory_items(),
        announcements(),
    ]
}

fn brands() -> EntitySchema {
    EntitySchema::new("brands", "brands")
        .display("Brands", "Top-level brands", "award", "purple")
        .roles(&["admin", "super_admin", "brand_manager"])
        .rbac(RbacLevel::Brand)
        .scope_column("id")
        .sort(SortSpec::asc("name"))
        .filterable("name", "Name", FilterKind::Text)
        .action(ActionDef::new("edit", "Edit").for_roles(&["admin", "super_admin"]))
}

fn sectors() -> EntitySchema {
    EntitySchema::new("sectors", "sectors")
        .display("Sectors", "Regional sectors of a brand", "map", "indigo")
        .roles(MANAGERS)
        .rbac(RbacLevel::Sector)
        .scope_column("id")
        .sort(SortSpec::asc("name"))
        .relation("brand_id", Relationship::to("brands"))
        .filterable("brand_id", "Brand", FilterKind::Relation { entity: "brands".to_string() })
        .action(ActionDef::new("edit", "Edit").for_roles(&["admin", "super_admin", "brand_manager"]))
}

fn areas() -> EntitySchema {
    EntitySchema::new("areas", "areas")
        .display("Areas", "Operational areas of a sector", "map-pin", "blue")
        .roles(MANAGERS)
        .rbac(RbacLevel::Area)
        .scope_column("id")
        .sort(SortSpec::asc("name"))
        .relation("sector_id", Relationship::to("sectors"))
        .filterable("sector_id", "Sector", FilterKind::Relation { entity: "sectors".to_string() })
}

fn branches() -> EntitySchema {
    EntitySchema::new("branches", "branches")
        .display("Branches", "Stores and sites", "store", "teal")
        .roles(STAFF)
        .rbac(RbacLevel::Branch)
        .scope_column("id")
        .soft_delete()
        .sort(SortSpec::asc("name"))
        .relation("area_id", Relationship::to("areas").display(&["name", "code"]))
        .filterable("area_id", "Area", FilterKind::Relation { entity: "areas".to_string() })
        .filterable("is_active", "Active", FilterKind::Boolean)
        .metric(MetricDef::count("total", "Branches"))
        .metric(MetricDef::count("active", "Active").when("is_active", FilterValue::equals(true)))
}

fn profiles() -> EntitySchema {
    EntitySchema::new("profiles", "profiles")
        .display("Users", "Staff profiles", "users", "slate")
        .roles(MANAGERS)
        .sort(SortSpec::asc("full_name"))
        .relation("branch_id", Relationship::to("branches"))
        .filterable("role", "Role", select(STAFF))
        .metric(MetricDef::count("technicians", "Technicians").when("role", FilterValue::equals("technician")))
}

fn tickets() -> EntitySchema {
    EntitySchema::new("tickets", "tickets")
        .display("Tickets", "Maintenance requests", "wrench", "orange")
        .roles(STAFF)
        .soft_delete()
        .relation("branch_id", Relationship::to("branches"))
        .relation("asset_id", Relationship::to("assets"))
        .relation("category_id", Relationship::to("ticket_categories").alias("category"))
        .relation(
            "assigned_to",
            Relationship::to("profiles").alias("assignee").display(&["full_name"]),
        )
        .relation(
            "created_by",
            Relationship::to("profiles").alias("reporter").display(&["full_name"]),
        )
        .filterable("status", "Status", select(&["open", "in_progress", "on_hold", "closed"]))
        .filterable("priority", "Priority", select(&["low", "medium", "high", "urgent"]))
        .filterable("created_at", "Created", FilterKind::DateRange)
        .filterable("branch_id", "Branch", FilterKind::Relation { entity: "branches".to_string() })
        .metric(MetricDef::count("total", "All tickets"))
        .metric(MetricDef::count("open", "Open").when("status", FilterValue::equals("open")))
        .metric(
            MetricDef::count("in_progress", "In progress")
                .when("status", FilterValue::equals("in_progress")),
        )
        .metric(MetricDef::count("urgent", "Urgent").when("priority", FilterValue::equals("urgent")))
        .action(ActionDef::new("view", "View"))
        .action(ActionDef::new("edit", "Edit"))
        .action(ActionDef::new("assign", "Assign").for_roles(MANAGERS))
        .action(ActionDef::new("close", "Close").for_roles(&["branch_manager", "area_manager", "admin", "super_admin"]))
}

fn ticket_comments() -> EntitySchema {
    EntitySchema::new("ticket_comments", "ticket_comments")
        .display("Comments", "Ticket discussion", "message-square", "gray")
        .roles(STAFF)
        .scoped_via("ticket_id")
        .relation("ticket_id", Relationship::to("tickets").display(&["title"]))
        .relation(
            "author_id",
            Relationship::to("profiles").alias("author").display(&["full_name"]),
        )
}

fn ticket_categories() -> EntitySchema {
    EntitySchema::new("ticket_categories", "ticket_categories")
        .display("Categories", "Ticket categories", "tag", "pink")
        .global()
        .sort(SortSpec::asc("name"))
        .action(ActionDef::new("edit", "Edit").for_roles(&["admin", "super_admin"]))
}

fn assets() -> EntitySchema {
    EntitySchema::new("assets", "assets")
        .display("Assets", "Equipment installed at branches", "cpu", "green")
        .roles(STAFF)
        .soft_delete()
        .relation("branch_id", Relationship::to("branches"))
        .filterable("status", "Status", select(&["operational", "under_maintenance", "retired"]))
        .filterable("installed_at", "Installed", FilterKind::DateRange)
        .metric(MetricDef::count("total", "Assets"))
        .metric(
            MetricDef::count("under_maintenance", "Under maintenance")
                .when("status", FilterValue::equals("under_maintenance")),
        )
}

fn maintenance_schedules() -> EntitySchema {
    EntitySchema::new("maintenance_schedules", "maintenance_schedules")
        .display("Schedules", "Preventive maintenance plans", "calendar", "cyan")
        .roles(STAFF)
        .sort(SortSpec::asc("next_due_at"))
        .relation("branch_id", Relationship::to("branches"))
        .relation("asset_id", Relationship::to("assets"))
        .filterable("frequency", "Frequency", select(&["weekly", "monthly", "quarterly", "yearly"]))
        .filterable("next_due_at", "Next due", FilterKind::DateRange)
}

fn inventory_items() -> EntitySchema {
    EntitySchema::new("inventory_items", "inventory_items")
        .display("Inventory", "Spare parts held per area warehouse", "package", "amber")
        .roles(STAFF)
        .rbac(RbacLevel::Area)
        .scope_column("area_id")
        .soft_delete()
        .sort(SortSpec::asc("name"))
        .relation("area_id", Relationship::to("areas"))
        .filterable("name", "Name", FilterKind::Text)
        .metric(MetricDef::count("total", "Items"))
        .metric(MetricDef::count("out_of_stock", "Out of stock").when("quantity", FilterValue::equals(0)))
}

fn announcements() -> EntitySchema {
    EntitySchema::new("announcements", "announcements")
        .display("Announcements", "Brand-wide notices", "megaphone", "red")
        .rbac(RbacLevel::Brand)
        .scope_column("brand_id")
        .relation("brand_id", Relationship::to("brands"))
        .filterable("published_at", "Published", FilterKind::DateRange)
}
