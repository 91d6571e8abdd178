// src/overlay.rs - Skeleton overlay drawn straight into the frame buffer
use image::{Rgb, RgbImage};

use crate::error::ConfigError;
use crate::landmarks::{LandmarkSet, SkeletonTopology};

pub const MAX_MARKER_RADIUS: i64 = 64;
pub const MAX_EDGE_THICKNESS: i64 = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub marker_radius: i64,
    pub edge_thickness: i64,
    pub marker_color: Rgb<u8>,
    pub edge_color: Rgb<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            marker_radius: 3,
            edge_thickness: 2,
            marker_color: Rgb([0, 255, 0]),
            edge_color: Rgb([0, 140, 255]),
        }
    }
}

impl OverlayStyle {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_MARKER_RADIUS).contains(&self.marker_radius) {
            return Err(ConfigError::Invalid(format!(
                "marker radius must lie in [0, {}] (got {})",
                MAX_MARKER_RADIUS, self.marker_radius
            )));
        }
        if !(1..=MAX_EDGE_THICKNESS).contains(&self.edge_thickness) {
            return Err(ConfigError::Invalid(format!(
                "edge thickness must lie in [1, {}] (got {})",
                MAX_EDGE_THICKNESS, self.edge_thickness
            )));
        }
        Ok(())
    }
}

/// What a single `render` call actually drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStats {
    pub markers: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draws markers and edges whose confidence reaches `min_visibility`.
    ///
    /// Anything below the threshold is silently left out, so an occluded limb
    /// yields a partial skeleton. Geometry outside the frame is clipped.
    pub fn render(
        &self,
        frame: &mut RgbImage,
        landmarks: &LandmarkSet,
        topology: &SkeletonTopology,
        min_visibility: f64,
    ) -> OverlayStats {
        let mut stats = OverlayStats::default();

        // Edges first so markers sit on top
        for &(a, b) in topology.edges() {
            let (Some(start), Some(end)) = (landmarks.get(a), landmarks.get(b)) else {
                continue;
            };
            if start.confidence.min(end.confidence) < min_visibility {
                continue;
            }
            self.draw_segment(
                frame,
                (start.position.x, start.position.y),
                (end.position.x, end.position.y),
            );
            stats.edges += 1;
        }

        for lm in landmarks {
            if !lm.is_visible(min_visibility) {
                continue;
            }
            self.draw_marker(frame, lm.position.x, lm.position.y);
            stats.markers += 1;
        }

        stats
    }

    fn draw_marker(&self, frame: &mut RgbImage, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        let r = self.style.marker_radius.max(0);
        let (w, h) = (i64::from(frame.width()), i64::from(frame.height()));
        // Markers entirely off-frame draw nothing
        if x < -(r as f64) - 1.0 || y < -(r as f64) - 1.0 || x > (w + r) as f64 || y > (h + r) as f64 {
            return;
        }
        fill_circle(frame, x as i64, y as i64, r, self.style.marker_color);
    }

    fn draw_segment(&self, frame: &mut RgbImage, p0: (f64, f64), p1: (f64, f64)) {
        let pad = self.style.edge_thickness.max(1) as f64;
        let bounds = (
            -pad,
            -pad,
            f64::from(frame.width()) - 1.0 + pad,
            f64::from(frame.height()) - 1.0 + pad,
        );
        let Some((a, b)) = clip_segment(p0, p1, bounds) else {
            return;
        };
        let color = self.style.edge_color;
        let half = (self.style.edge_thickness.max(1) - 1) / 2;
        let extra = (self.style.edge_thickness.max(1) - 1) - half;

        bresenham(a.0 as i64, a.1 as i64, b.0 as i64, b.1 as i64, |x, y| {
            for dy in -half..=extra {
                for dx in -half..=extra {
                    set_pixel(frame, x + dx, y + dy, color);
                }
            }
        });
    }
}

/// Liang-Barsky clip of a segment against `(x_min, y_min, x_max, y_max)`.
fn clip_segment(
    p0: (f64, f64),
    p1: (f64, f64),
    (x_min, y_min, x_max, y_max): (f64, f64, f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    if !(p0.0.is_finite() && p0.1.is_finite() && p1.0.is_finite() && p1.1.is_finite()) {
        return None;
    }
    let dx = p1.0 - p0.0;
    let dy = p1.1 - p0.1;
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;

    for (p, q) in [
        (-dx, p0.0 - x_min),
        (dx, x_max - p0.0),
        (-dy, p0.1 - y_min),
        (dy, y_max - p0.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    Some((
        (p0.0 + t0 * dx, p0.1 + t0 * dy),
        (p0.0 + t1 * dx, p0.1 + t1 * dy),
    ))
}

fn bresenham(x0: i64, y0: i64, x1: i64, y1: i64, mut plot: impl FnMut(i64, i64)) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        plot(x, y);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_circle(frame: &mut RgbImage, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                set_pixel(frame, cx + dx, cy + dy, color);
            }
        }
    }
}

fn set_pixel(frame: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(frame.width()) && y < i64::from(frame.height()) {
        frame.put_pixel(x as u32, y as u32, color);
    }
}
