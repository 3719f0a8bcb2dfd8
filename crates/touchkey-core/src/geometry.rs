//! Hit-testing: which key is under a touch point
//!
//! The pointer tracker only needs `key_at(x, y)`. The presentation layer
//! supplies it; [`GridGeometry`] is the stock implementation, and any
//! `Fn(f32, f32) -> Option<Key>` works too (handy in tests).

use crate::layout::{Key, KeyLayout};

/// Resolves surface coordinates to the key drawn there.
pub trait KeyResolver: Send {
    fn key_at(&self, x: f32, y: f32) -> Option<Key>;
}

impl<F> KeyResolver for F
where
    F: Fn(f32, f32) -> Option<Key> + Send,
{
    fn key_at(&self, x: f32, y: f32) -> Option<Key> {
        self(x, y)
    }
}

/// A half-open rectangle: left/top edges inside, right/bottom outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Rows share the surface height equally. Within a row, key widths are
/// proportional to their relative width, with `margin` between keys and
/// around the edges.
#[derive(Debug, Clone)]
pub struct GridGeometry {
    rects: Vec<(Key, Rect)>,
}

impl GridGeometry {
    pub fn new(layout: &KeyLayout, width: f32, height: f32, margin: f32) -> Self {
        let rows = layout.rows();
        let mut rects = Vec::with_capacity(layout.keys().len());
        if rows.is_empty() {
            return Self { rects };
        }

        let row_height = height / rows.len() as f32;
        for (index, (_, keys)) in rows.iter().enumerate() {
            let total_width: f32 = keys.iter().map(|k| k.width).sum();
            let unit = (width - (keys.len() as f32 + 1.0) * margin) / total_width;
            let top = index as f32 * row_height + margin;
            let key_height = row_height - 2.0 * margin;

            let mut left = margin;
            for key in keys {
                let key_width = key.width * unit;
                rects.push((
                    (*key).clone(),
                    Rect {
                        left,
                        top,
                        right: left + key_width,
                        bottom: top + key_height,
                    },
                ));
                left += key_width + margin;
            }
        }

        tracing::debug!(
            "Laid out {} keys in {} rows on a {}x{} surface",
            rects.len(),
            rows.len(),
            width,
            height
        );

        Self { rects }
    }

    pub fn rect_of(&self, key: &Key) -> Option<Rect> {
        self.rects.iter().find(|(k, _)| k == key).map(|(_, r)| *r)
    }

    pub fn rects(&self) -> &[(Key, Rect)] {
        &self.rects
    }
}

impl KeyResolver for GridGeometry {
    fn key_at(&self, x: f32, y: f32) -> Option<Key> {
        self.rects
            .iter()
            .find(|(_, rect)| rect.contains(x, y))
            .map(|(key, _)| key.clone())
    }
}
