/// Minimal spatial support: WKT points indexed per field, circle and
/// bounding-box shapes at query time, and distances for `__distance`
/// sorting.

/// Mean earth radius, kilometers.
const EARTH_RADIUS_KM: f64 = 6_371.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SpatialShape {
    Circle { lat: f64, lng: f64, radius_km: f64 },
    BoundingBox { min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64 },
}

impl SpatialShape {
    /// Reference point used for `__distance` sorting.
    pub fn origin(&self) -> (f64, f64) {
        match self {
            SpatialShape::Circle { lat, lng, .. } => (*lat, *lng),
            SpatialShape::BoundingBox { min_lng, min_lat, max_lng, max_lat } => {
                ((min_lat + max_lat) / 2.0, (min_lng + max_lng) / 2.0)
            }
        }
    }

    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        match self {
            SpatialShape::Circle { lat: center_lat, lng: center_lng, radius_km } => {
                haversine_km(*center_lat, *center_lng, lat, lng) <= *radius_km
            }
            SpatialShape::BoundingBox { min_lng, min_lat, max_lng, max_lat } => {
                lng >= *min_lng && lng <= *max_lng && lat >= *min_lat && lat <= *max_lat
            }
        }
    }
}

/// How indexed shapes must relate to the query shape. Indexed shapes
/// are points, so the two strategies currently coincide; both are kept
/// because query surfaces distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialStrategy {
    Within,
    Intersects,
}

/// A spatial restriction attached to a query. Wrapped around the
/// parsed query as a MUST + MUST boolean.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialIndexQuery {
    pub field: String,
    pub shape: SpatialShape,
    pub strategy: SpatialStrategy,
}

impl SpatialIndexQuery {
    pub fn matches(&self, lng: f64, lat: f64) -> bool {
        match self.strategy {
            SpatialStrategy::Within | SpatialStrategy::Intersects => {
                self.shape.contains(lng, lat)
            }
        }
    }
}

/// Parses a stored spatial value: WKT `POINT (lng lat)` or a bare
/// `lng lat` pair. Returns `(lng, lat)`.
pub fn parse_point(text: &str) -> Option<(f64, f64)> {
    let trimmed = text.trim();
    let coordinates = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("point") => {
            let rest = trimmed[5..].trim_start();
            let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
            inner.trim()
        }
        _ => trimmed,
    };
    let mut parts = coordinates.split_whitespace();
    let lng: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat)
    {
        return None;
    }
    Some((lng, lat))
}

/// Great-circle distance between two points, kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
