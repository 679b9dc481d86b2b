//! New York area locations for realistic test fixtures.
//!
//! Coordinates are approximate landmark positions (OpenStreetMap).

/// A named place with coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Place {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }
}

// ============================================================================
// Midtown Manhattan (all within a mile of each other)
// ============================================================================

pub const TIMES_SQUARE: Place = Place::new("Times Square", 40.7580, -73.9855);
pub const BRYANT_PARK: Place = Place::new("Bryant Park", 40.7536, -73.9832);
pub const GRAND_CENTRAL: Place = Place::new("Grand Central", 40.7527, -73.9772);
pub const EMPIRE_STATE: Place = Place::new("Empire State Building", 40.7484, -73.9857);
pub const HERALD_SQUARE: Place = Place::new("Herald Square", 40.7496, -73.9877);
pub const ROCKEFELLER_CENTER: Place = Place::new("Rockefeller Center", 40.7587, -73.9787);

pub const MIDTOWN: &[Place] = &[
    TIMES_SQUARE,
    BRYANT_PARK,
    GRAND_CENTRAL,
    EMPIRE_STATE,
    HERALD_SQUARE,
    ROCKEFELLER_CENTER,
];

// ============================================================================
// Brooklyn (5 to 7 miles from Midtown)
// ============================================================================

pub const BARCLAYS_CENTER: Place = Place::new("Barclays Center", 40.6826, -73.9754);
pub const BROOKLYN_MUSEUM: Place = Place::new("Brooklyn Museum", 40.6712, -73.9636);
pub const PROSPECT_PARK: Place = Place::new("Prospect Park", 40.6602, -73.9690);
pub const GRAND_ARMY_PLAZA: Place = Place::new("Grand Army Plaza", 40.6740, -73.9700);

pub const BROOKLYN: &[Place] = &[BARCLAYS_CENTER, BROOKLYN_MUSEUM, PROSPECT_PARK, GRAND_ARMY_PLAZA];

// ============================================================================
// Outlying (well beyond any shift radius from Midtown)
// ============================================================================

pub const TRENTON: Place = Place::new("Trenton City Hall", 40.2206, -74.7597);
pub const PHILADELPHIA: Place = Place::new("Philadelphia City Hall", 39.9526, -75.1652);
