//! Haar cascade classifier
//!
//! Loads cascades in the OpenCV `opencv-cascade-classifier` XML format
//! (BOOST stages, HAAR features) and runs the usual sliding-window scan over
//! an image pyramid, followed by neighbour grouping of the raw hits.

use std::path::Path;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{GrayImage, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image};
use roxmltree::{Document, Node};
use tracing::{debug, info};

use crate::config::DetectionParams;
use crate::geometry::Rect;
use crate::CascadeError;

/// Relative tolerance used when merging overlapping hits
const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A boosted cascade of Haar-like features
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load a cascade from an XML file
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;
        info!(
            "Loaded cascade {} ({} stages, {} features, window {}x{})",
            path.display(),
            cascade.stages.len(),
            cascade.features.len(),
            cascade.window_width,
            cascade.window_height
        );
        Ok(cascade)
    }

    /// Parse a cascade from XML text
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = Document::parse(xml)?;
        let root = doc
            .root_element()
            .children()
            .find(|n| n.is_element())
            .ok_or_else(|| CascadeError::Invalid("empty document".into()))?;

        if child(root, "stages").is_ok() && child(root, "stageType").is_err() {
            return Err(CascadeError::Unsupported("legacy cascade format".into()));
        }

        let stage_type = text(child(root, "stageType")?);
        if stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {}", stage_type)));
        }
        let feature_type = text(child(root, "featureType")?);
        if feature_type != "HAAR" {
            return Err(CascadeError::Unsupported(format!("feature type {}", feature_type)));
        }

        let window_width: u32 = parse_one(child(root, "width")?)?;
        let window_height: u32 = parse_one(child(root, "height")?)?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {}x{} too small",
                window_width, window_height
            )));
        }

        let features = items(child(root, "features")?)
            .map(|n| parse_feature(n, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child(root, "stages")?)
            .map(|n| parse_stage(n, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Training window size (width, height)
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Scan `image` at every pyramid level and return grouped detections
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &DetectionParams) -> Vec<Rect> {
        let (img_w, img_h) = image.dimensions();
        let (max_w, max_h) = match params.max_size_ratio {
            Some(ratio) => (
                (img_w as f64 * ratio).round() as u32,
                (img_h as f64 * ratio).round() as u32,
            ),
            None => (img_w, img_h),
        };

        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;

            if win_w > max_w || win_h > max_h {
                break;
            }
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }

            if win_w >= params.min_size && win_h >= params.min_size {
                let level = if factor == 1.0 {
                    image.clone()
                } else {
                    image::imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle)
                };
                self.scan_level(&level, factor, win_w, win_h, &mut hits);
            }

            if params.scale_factor <= 1.0 {
                break;
            }
            factor *= params.scale_factor;
        }

        debug!("Cascade scan: {} raw hits", hits.len());
        group_rectangles(hits, params.min_neighbors, GROUP_EPS)
    }

    fn scan_level(&self, level: &GrayImage, factor: f64, win_w: u32, win_h: u32, hits: &mut Vec<Rect>) {
        let sums = integral_image::<Luma<u8>, u64>(level);
        let squares = integral_squared_image::<Luma<u8>, u64>(level);
        let table = Integrals {
            stride: level.width() as usize + 1,
            sum: sums.as_raw(),
            sq: squares.as_raw(),
        };

        let step = if factor > 2.0 { 1 } else { 2 };
        let last_x = level.width() - self.window_width;
        let last_y = level.height() - self.window_height;

        let mut y = 0;
        while y <= last_y {
            let mut x = 0;
            while x <= last_x {
                let result = self.run_at(&table, x, y);
                if result > 0 {
                    hits.push(Rect::new(
                        (x as f64 * factor).round() as i32,
                        (y as f64 * factor).round() as i32,
                        win_w as i32,
                        win_h as i32,
                    ));
                } else if result == 0 {
                    // rejected by the first stage: neighbouring window is unlikely too
                    x += step;
                }
                x += step;
            }
            y += step;
        }
    }

    /// 1 when every stage passes, otherwise `-stage_index` of the rejecting stage
    fn run_at(&self, table: &Integrals<'_>, x: u32, y: u32) -> i32 {
        let inv_norm = self.variance_norm(table, x, y);

        for (index, stage) in self.stages.iter().enumerate() {
            let mut total = 0.0;
            for weak in &stage.classifiers {
                total += self.eval_tree(weak, table, x, y, inv_norm);
            }
            if total < stage.threshold {
                return -(index as i32);
            }
        }
        1
    }

    fn variance_norm(&self, table: &Integrals<'_>, x: u32, y: u32) -> f64 {
        let (nx, ny) = (x + 1, y + 1);
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = table.rect_sum(nx, ny, nw, nh) as f64;
        let sq = table.rect_sq_sum(nx, ny, nw, nh) as f64;

        let nf = area * sq - sum * sum;
        let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };
        1.0 / nf
    }

    fn eval_tree(&self, weak: &WeakClassifier, table: &Integrals<'_>, x: u32, y: u32, inv_norm: f64) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = weak.nodes[idx as usize];
            let value = self.feature_value(node.feature, table, x, y) * inv_norm;
            idx = if value < node.threshold { node.left } else { node.right };
            if idx <= 0 {
                return weak.leaves[(-idx) as usize];
            }
        }
    }

    fn feature_value(&self, feature: usize, table: &Integrals<'_>, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * table.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

/// Borrowed summed-area tables of one pyramid level
struct Integrals<'a> {
    stride: usize,
    sum: &'a [u64],
    sq: &'a [u64],
}

impl Integrals<'_> {
    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        area_sum(self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        area_sum(self.sq, self.stride, x, y, w, h)
    }
}

fn area_sum(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let (x0, y0) = (x as usize, y as usize);
    let (x1, y1) = (x0 + w as usize, y0 + h as usize);
    let top_left = table[y0 * stride + x0];
    let top_right = table[y0 * stride + x1];
    let bottom_left = table[y1 * stride + x0];
    let bottom_right = table[y1 * stride + x1];
    (bottom_right + top_left) - (top_right + bottom_left)
}

/// Merge raw detections that describe the same object.
///
/// Hits are clustered by similarity, each cluster is averaged, clusters with
/// `min_neighbors` or fewer members are dropped, and small clusters nested
/// inside a stronger one are suppressed. With `min_neighbors == 0` the raw
/// hits are returned unchanged.
pub fn group_rectangles(rects: Vec<Rect>, min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let labels = partition(&rects, eps);
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0i64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (rect, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += rect.x as i64;
        s[1] += rect.y as i64;
        s[2] += rect.width as i64;
        s[3] += rect.height as i64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let n = n as f64;
            Rect::new(
                (s[0] as f64 / n).round() as i32,
                (s[1] as f64 / n).round() as i32,
                (s[2] as f64 / n).round() as i32,
                (s[3] as f64 / n).round() as i32,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            grouped.push(*r1);
        }
    }
    grouped
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.width - b.x - b.width).abs() as f64) <= delta
        && ((a.y + a.height - b.y - b.height).abs() as f64) <= delta
}

/// Equivalence classes of `similar`, labelled 0.. in order of first appearance
fn partition(rects: &[Rect], eps: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut labels = vec![usize::MAX; rects.len()];
    let mut root_label = vec![usize::MAX; rects.len()];
    let mut next = 0;
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        if root_label[root] == usize::MAX {
            root_label[root] = next;
            next += 1;
        }
        labels[i] = root_label[root];
    }
    labels
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, CascadeError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| CascadeError::Invalid(format!("missing <{}>", name)))
}

fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("").trim()
}

fn parse_list<T: FromStr>(node: Node<'_, '_>) -> Result<Vec<T>, CascadeError> {
    text(node)
        .split_whitespace()
        .map(|token| {
            token.parse::<T>().map_err(|_| {
                CascadeError::Invalid(format!("bad number {:?} in <{}>", token, node.tag_name().name()))
            })
        })
        .collect()
}

fn parse_one<T: FromStr>(node: Node<'_, '_>) -> Result<T, CascadeError> {
    parse_list::<T>(node)?
        .into_iter()
        .next()
        .ok_or_else(|| CascadeError::Invalid(format!("empty <{}>", node.tag_name().name())))
}

fn parse_feature(node: Node<'_, '_>, window_width: u32, window_height: u32) -> Result<HaarFeature, CascadeError> {
    if let Ok(tilted) = child(node, "tilted") {
        if parse_one::<i32>(tilted)? != 0 {
            return Err(CascadeError::Unsupported("tilted Haar features".into()));
        }
    }

    let rects = items(child(node, "rects")?)
        .map(|r| {
            let values = parse_list::<f64>(r)?;
            if values.len() != 5 {
                return Err(CascadeError::Invalid(format!("feature rect has {} values", values.len())));
            }
            if values[..4].iter().any(|v| *v < 0.0) {
                return Err(CascadeError::Invalid("negative feature rect".into()));
            }
            let rect = WeightedRect {
                x: values[0] as u32,
                y: values[1] as u32,
                width: values[2] as u32,
                height: values[3] as u32,
                weight: values[4],
            };
            if rect.x + rect.width > window_width || rect.y + rect.height > window_height {
                return Err(CascadeError::Invalid("feature rect outside window".into()));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::Invalid("feature without rects".into()));
    }
    Ok(HaarFeature { rects })
}

fn parse_stage(node: Node<'_, '_>, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold: f64 = parse_one(child(node, "stageThreshold")?)?;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(|n| parse_weak(n, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage { threshold, classifiers })
}

fn parse_weak(node: Node<'_, '_>, feature_count: usize) -> Result<WeakClassifier, CascadeError> {
    let raw = parse_list::<f64>(child(node, "internalNodes")?)?;
    let leaves = parse_list::<f64>(child(node, "leafValues")?)?;

    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!("{} internal node values", raw.len())));
    }

    let nodes: Vec<TreeNode> = raw
        .chunks_exact(4)
        .map(|c| TreeNode {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for n in &nodes {
        if n.feature >= feature_count {
            return Err(CascadeError::Invalid(format!("feature index {} out of range", n.feature)));
        }
        for link in [n.left, n.right] {
            let valid = if link > 0 {
                (link as usize) < nodes.len()
            } else {
                ((-link) as usize) < leaves.len()
            };
            if !valid {
                return Err(CascadeError::Invalid(format!("dangling tree link {}", link)));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}
