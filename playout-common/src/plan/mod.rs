//! Show-plan value types: markers, items and the ordered plan

mod item;
mod marker;
mod show_plan;

pub use item::{ghost_id, ContentRef, PlanItem, DETACHED_WEIGHT};
pub use marker::{Marker, MarkerPosition};
pub use show_plan::{EntryKey, ShowPlan};
