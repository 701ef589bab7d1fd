/// Default tile size for the scratch surface.
pub const DEFAULT_TILE_SIZE: u32 = 128;

/// Minimum dab footprint in canvas units. Smaller requested sizes are
/// rendered at this footprint with alpha-coverage compensation.
pub const MIN_DAB_FOOTPRINT: f32 = 1.0;

/// Number of entries in a baked pressure curve lookup table.
pub const PRESSURE_LUT_SIZE: usize = 64;

/// Lower bound on spacing distance to prevent unbounded dab emission.
pub const MIN_SPACING_DISTANCE: f32 = 0.05;
