//! File formats at the core's boundary: reading the input mesh (`.off`),
//! persisting intermediate state (`.vox`, `.bbw`, `.opt`), and exporting the
//! final surfaces (`.stl`). Spec §6 treats mesh I/O as an external
//! collaborator and scopes config-file (`.mis`) parsing out entirely; the
//! formats here are the ones the core itself reads and writes.

pub mod bbw;
pub mod off;
pub mod opt;
pub mod stl;
pub mod vox;
