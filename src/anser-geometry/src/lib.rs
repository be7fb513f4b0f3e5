//! Geometry support for anser.
//!
//! Everything spatial lives here: the clip predicate with its prepared
//! index and stable fingerprint, the WKB codec used by every stage, the
//! validity repair pass, multipolygon ring assembly and the Hilbert index
//! behind the output sort.

pub mod clip;
pub mod hilbert;
pub mod parse;
pub mod repair;
pub mod rings;
pub mod wkb;

pub use clip::GeometryPredicate;
pub use hilbert::hilbert_index;
pub use repair::{repair_linear, repair_polygonal};
pub use rings::{assemble_multipolygon, MemberLine, RingAssembly};
pub use self::wkb::{from_wkb, geometry_type_name, to_wkb, to_wkt_string};
