// Screen-space rectangle helpers shared by the layout strategies. All
// coordinates are pixels, y pointing down.

/// `(x, y, w, h)` with `(x, y)` the top-left corner.
pub type Rect = (f32, f32, f32, f32);

pub fn rect_around(center: (f32, f32), w: f32, h: f32) -> Rect {
    (center.0 - w * 0.5, center.1 - h * 0.5, w, h)
}

/// Strict intersection; boxes that only touch do not overlap.
pub fn rects_overlap(a: &Rect, b: &Rect) -> bool {
    a.0 < b.0 + b.2 && b.0 < a.0 + a.2 && a.1 < b.1 + b.3 && b.1 < a.1 + a.3
}

pub fn overlap_area(a: &Rect, b: &Rect) -> f32 {
    let x0 = a.0.max(b.0);
    let y0 = a.1.max(b.1);
    let x1 = (a.0 + a.2).min(b.0 + b.2);
    let y1 = (a.1 + a.3).min(b.1 + b.3);
    let w = (x1 - x0).max(0.0);
    let h = (y1 - y0).max(0.0);
    w * h
}

/// Euclidean gap between two rectangles, zero when they intersect.
pub fn rect_gap(a: &Rect, b: &Rect) -> f32 {
    let dx = (b.0 - (a.0 + a.2)).max(a.0 - (b.0 + b.2)).max(0.0);
    let dy = (b.1 - (a.1 + a.3)).max(a.1 - (b.1 + b.3)).max(0.0);
    (dx * dx + dy * dy).sqrt()
}

pub fn inflate_rect(rect: Rect, pad: f32) -> Rect {
    if pad <= 0.0 {
        return rect;
    }
    (
        rect.0 - pad,
        rect.1 - pad,
        rect.2 + pad * 2.0,
        rect.3 + pad * 2.0,
    )
}

/// Area of `rect` lying outside `[0, w] x [0, h]`.
pub fn outside_area(rect: &Rect, bounds: (f32, f32)) -> f32 {
    let (w, h) = bounds;
    let rect_area = rect.2.max(0.0) * rect.3.max(0.0);
    if rect_area <= 0.0 {
        return 0.0;
    }
    let x0 = rect.0.max(0.0);
    let y0 = rect.1.max(0.0);
    let x1 = (rect.0 + rect.2).min(w);
    let y1 = (rect.1 + rect.3).min(h);
    let inside_w = (x1 - x0).max(0.0);
    let inside_h = (y1 - y0).max(0.0);
    rect_area - inside_w * inside_h
}

/// Whether a box of `w x h` centred at `center` stays `margin` inside bounds.
pub fn fits_in_bounds(center: (f32, f32), w: f32, h: f32, margin: f32, bounds: (f32, f32)) -> bool {
    let rect = inflate_rect(rect_around(center, w, h), margin);
    outside_area(&rect, bounds) <= 1e-3
}

/// Keep a `w x h` box centred at `center` at least `margin` inside bounds.
/// A box larger than the bounds is centred on that axis.
pub fn clamp_center_to_bounds(
    center: (f32, f32),
    w: f32,
    h: f32,
    margin: f32,
    bounds: (f32, f32),
) -> (f32, f32) {
    let (bw, bh) = bounds;
    if bw <= 0.0 || bh <= 0.0 {
        return center;
    }
    let min_x = w * 0.5 + margin;
    let min_y = h * 0.5 + margin;
    let max_x = bw - w * 0.5 - margin;
    let max_y = bh - h * 0.5 - margin;

    let x = if max_x < min_x {
        bw * 0.5
    } else {
        center.0.clamp(min_x, max_x)
    };
    let y = if max_y < min_y {
        bh * 0.5
    } else {
        center.1.clamp(min_y, max_y)
    };
    (x, y)
}

pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Pull `center` back onto the circle of `radius` around `anchor` if it
/// strayed further.
pub fn clamp_to_radius(center: (f32, f32), anchor: (f32, f32), radius: f32) -> (f32, f32) {
    let d = distance(center, anchor);
    if radius <= 0.0 || d <= radius || d <= f32::EPSILON {
        return center;
    }
    let scale = radius / d;
    (
        anchor.0 + (center.0 - anchor.0) * scale,
        anchor.1 + (center.1 - anchor.1) * scale,
    )
}
