//! Organizational hierarchy (brand → sector → area → branch) and scope routes

use crate::contract::{CallerProfile, OrgLevel, UserScope};

impl OrgLevel {
    /// All levels, most specific first
    pub const FINEST_FIRST: [OrgLevel; 4] = [
        OrgLevel::Branch,
        OrgLevel::Area,
        OrgLevel::Sector,
        OrgLevel::Brand,
    ];

    pub fn parent(self) -> Option<OrgLevel> {
        match self {
            Self::Branch => Some(Self::Area),
            Self::Area => Some(Self::Sector),
            Self::Sector => Some(Self::Brand),
            Self::Brand => None,
        }
    }

    /// Backend table holding the rows of this level
    pub fn table(self) -> &'static str {
        match self {
            Self::Branch => "branches",
            Self::Area => "areas",
            Self::Sector => "sectors",
            Self::Brand => "brands",
        }
    }

    /// Foreign-key column referencing this level
    pub fn foreign_key(self) -> &'static str {
        match self {
            Self::Branch => "branch_id",
            Self::Area => "area_id",
            Self::Sector => "sector_id",
            Self::Brand => "brand_id",
        }
    }

    pub fn from_table(table: &str) -> Option<OrgLevel> {
        Self::FINEST_FIRST
            .into_iter()
            .find(|level| level.table() == table)
    }

    pub fn is_coarser_than(self, other: OrgLevel) -> bool {
        self > other
    }
}

impl UserScope {
    /// Reduce a profile to its most specific hierarchy identifier.
    ///
    /// Coarser identifiers are ignored once a finer one is present.
    pub fn resolve(profile: &CallerProfile) -> Option<UserScope> {
        OrgLevel::FINEST_FIRST.into_iter().find_map(|level| {
            profile.id_at(level).map(|id| UserScope { level, id })
        })
    }
}

/// Join hop from one table to a related scoped entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHop {
    /// Column on the previous table referencing `table`
    pub link_column: String,
    pub table: String,
    pub primary_key: String,
}

/// Resolved path from an entity's target table to its hierarchy anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRoute {
    pub anchor: OrgLevel,
    /// Related tables crossed before reaching the scope column
    pub via: Vec<ViaHop>,
    /// Scope column on the last `via` table (or on the target table when `via` is empty)
    pub column: String,
    /// The target table is the anchor's own hierarchy table and `column` its primary key
    pub self_anchored: bool,
}

impl ScopeRoute {
    /// Column path to filter on for a caller scoped at `level`.
    ///
    /// Returns `None` when `level` is finer than the anchor: the path cannot
    /// express it from the caller's identifier alone.
    pub fn path_for(&self, level: OrgLevel) -> Option<String> {
        let mut segments: Vec<&str> = self.via.iter().map(|hop| hop.table.as_str()).collect();

        if level == self.anchor {
            segments.push(&self.column);
            return Some(segments.join("."));
        }
        if !level.is_coarser_than(self.anchor) {
            return None;
        }

        if !self.self_anchored {
            segments.push(self.anchor.table());
        }
        let mut current = self.anchor.parent();
        while let Some(ancestor) = current {
            if ancestor == level {
                break;
            }
            segments.push(ancestor.table());
            current = ancestor.parent();
        }
        segments.push(level.foreign_key());
        Some(segments.join("."))
    }

    /// Hierarchy levels whose tables are embedded above the anchor
    pub fn hierarchy_hops(&self) -> Vec<OrgLevel> {
        let first = if self.self_anchored {
            self.anchor.parent()
        } else {
            Some(self.anchor)
        };
        std::iter::successors(first, |level| level.parent()).collect()
    }
}
