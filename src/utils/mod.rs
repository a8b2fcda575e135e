//! Small serde helpers shared by the wire types.

pub mod time;
