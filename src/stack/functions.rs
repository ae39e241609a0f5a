use crate::contours::Contour;
use crate::stack::params::{Param, ParamValue};
use crate::Errors;
use anyhow::Result;
use image::buffer::ConvertBuffer;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::BorderType;
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, BresenhamLineIter};
use imageproc::filter::{box_filter, separable_filter_equal};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Parameter values of one stage
pub type Values = BTreeMap<String, ParamValue>;

/// Choice parameters backed by an enum
///
pub trait Choice: Sized + Copy + 'static {
    /// `(label, stored value, variant)`, the first entry is the default
    const CHOICES: &'static [(&'static str, &'static str, Self)];

    fn param(label: &'static str) -> Param {
        let choices = Self::CHOICES
            .iter()
            .map(|(l, v, _)| (*l, *v))
            .collect::<Vec<_>>();
        Param::choice(label, &choices)
    }

    fn parse(value: &str) -> Option<Self> {
        Self::CHOICES
            .iter()
            .find(|(_, v, _)| *v == value)
            .map(|(_, _, c)| *c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveMethod {
    Mean,
    Gaussian,
}

impl Choice for AdaptiveMethod {
    const CHOICES: &'static [(&'static str, &'static str, Self)] = &[
        ("Mean", "mean", AdaptiveMethod::Mean),
        ("Gaussian", "gaussian", AdaptiveMethod::Gaussian),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelShape {
    Ellipse,
    Rectangle,
    Cross,
}

impl Choice for KernelShape {
    const CHOICES: &'static [(&'static str, &'static str, Self)] = &[
        ("Ellipse", "ellipse", KernelShape::Ellipse),
        ("Rectangle", "rectangle", KernelShape::Rectangle),
        ("Cross", "cross", KernelShape::Cross),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphOperation {
    Open,
    Close,
    Gradient,
    TopHat,
    BlackHat,
}

impl Choice for MorphOperation {
    const CHOICES: &'static [(&'static str, &'static str, Self)] = &[
        ("Open", "open", MorphOperation::Open),
        ("Close", "close", MorphOperation::Close),
        ("Gradient", "gradient", MorphOperation::Gradient),
        ("Top Hat", "tophat", MorphOperation::TopHat),
        ("Black Hat", "blackhat", MorphOperation::BlackHat),
    ];
}

/// Which borders `find_contours` reports and how they are linked
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Outermost borders only
    External,
    /// Every border, without hierarchy
    List,
    /// Two levels: outer borders and the holes inside them
    Components,
    /// Every border with the full hierarchy
    Tree,
}

impl Choice for RetrievalMode {
    const CHOICES: &'static [(&'static str, &'static str, Self)] = &[
        ("External Contours", "external", RetrievalMode::External),
        ("All Contours", "list", RetrievalMode::List),
        ("Two Level", "ccomp", RetrievalMode::Components),
        ("Full Tree", "tree", RetrievalMode::Tree),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approximation {
    /// Every border pixel
    None,
    /// Straight runs compressed to their end points
    Simple,
    /// Douglas-Peucker with a one pixel tolerance
    Polygon,
}

impl Choice for Approximation {
    const CHOICES: &'static [(&'static str, &'static str, Self)] = &[
        ("All contour points", "none", Approximation::None),
        ("Compress segments", "simple", Approximation::Simple),
        ("Polygon", "polygon", Approximation::Polygon),
    ];
}

/// Image flowing between stages
///
#[derive(Debug, Clone, PartialEq)]
pub enum Image {
    Rgb(RgbImage),
    Gray(GrayImage),
}

impl Image {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Image::Rgb(i) => i.dimensions(),
            Image::Gray(i) => i.dimensions(),
        }
    }

    pub fn gray(&self) -> Cow<'_, GrayImage> {
        match self {
            Image::Rgb(i) => Cow::Owned(to_gray(i)),
            Image::Gray(i) => Cow::Borrowed(i),
        }
    }

    pub fn rgb(&self) -> Cow<'_, RgbImage> {
        match self {
            Image::Rgb(i) => Cow::Borrowed(i),
            Image::Gray(i) => Cow::Owned(i.convert()),
        }
    }
}

/// What a stage produced
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub image: Option<Image>,
    pub contours: Option<Vec<Contour>>,
}

impl Output {
    pub fn image(image: Image) -> Self {
        Self {
            image: Some(image),
            contours: None,
        }
    }

    pub fn contours(contours: Vec<Contour>) -> Self {
        Self {
            image: None,
            contours: Some(contours),
        }
    }
}

/// Inputs gathered for a stage from its sources
///
#[derive(Debug, Clone, Copy, Default)]
pub struct Input<'a> {
    pub image: Option<&'a Image>,
    pub contours: Option<&'a [Contour]>,
}

/// Stage types a stack is assembled from
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    ConvertColour,
    GaussianBlur,
    AdaptiveThreshold,
    Morphology,
    ExtractContours,
    SizeFilter,
    DrawContours,
    Preprocessing,
    Postprocessing,
}

impl Function {
    pub fn title(&self) -> &'static str {
        match self {
            Function::ConvertColour => "Convert Colour",
            Function::GaussianBlur => "Gaussian Blur",
            Function::AdaptiveThreshold => "Adaptive Threshold",
            Function::Morphology => "Morphological Operation",
            Function::ExtractContours => "Extract Contours",
            Function::SizeFilter => "Filter by Area",
            Function::DrawContours => "Draw Contours",
            Function::Preprocessing => "Preprocessing",
            Function::Postprocessing => "Postprocessing",
        }
    }

    /// Declared parameters, keyed by the name used in stored values
    ///
    pub fn params(&self) -> Vec<(&'static str, Param)> {
        match self {
            Function::ConvertColour => vec![],
            Function::GaussianBlur => vec![("size", Param::int("Size", 1, 101, 2, 5))],
            Function::AdaptiveThreshold => vec![
                ("block_size", Param::int("Block Size", 3, 101, 2, 31)),
                ("c", Param::int("C Value", -100, 100, 1, 10)),
                ("method", AdaptiveMethod::param("Threshold Type")),
            ],
            Function::Morphology => vec![
                ("ksize", Param::int("Kernel Size", 1, 99, 2, 3)),
                ("shape", KernelShape::param("Kernel Shape")),
                ("operation", MorphOperation::param("Operation")),
            ],
            Function::ExtractContours => vec![
                ("mode", RetrievalMode::param("Retrieval Mode")),
                ("method", Approximation::param("Method")),
            ],
            Function::SizeFilter => vec![
                ("minimum", Param::int("Minimum Size", 0, 1000, 1, 10)),
                ("maximum", Param::int("Maximum Size", 0, 1000, 1, 1000)),
            ],
            Function::DrawContours => vec![
                ("color", Param::color("Colour", [255, 0, 0])),
                ("thickness", Param::int("Thickness", 1, 100, 1, 1)),
            ],
            Function::Preprocessing => vec![
                ("blur_width", Param::int("Blur Size", 1, 999, 2, 5)),
                ("mask_center_x", Param::float("Mask Center x", 0.0, 1.0, 0.01, 0.5)),
                ("mask_center_y", Param::float("Mask Center y", 0.0, 1.0, 0.01, 0.5)),
            ],
            Function::Postprocessing => vec![
                ("ksize", Param::int("Kernel Size", 1, 255, 2, 3)),
                ("min_size", Param::float("Minimum Size", 0.0, 1000.0, 0.1, 10.0)),
                ("max_size", Param::float("Maximum Size", 0.0, 1000.0, 0.1, 1000.0)),
            ],
        }
    }

    /// Default values of every parameter
    pub fn defaults(&self) -> Values {
        self.params()
            .into_iter()
            .map(|(name, p)| (name.to_string(), p.default))
            .collect()
    }

    /// Runs the stage
    ///
    /// # Parameters
    /// * `stage` - name of the stage inside its stack, used in errors
    /// * `input` - image and contours gathered from the stage's sources
    /// * `values` - current parameter values
    ///
    pub fn apply(&self, stage: &str, input: Input<'_>, values: &Values) -> Result<Output> {
        let args = Args { stage, values };
        let image = || {
            input
                .image
                .ok_or_else(|| Errors::MissingStageInput(stage.to_string(), "image".into()))
        };
        let contours = || {
            input
                .contours
                .ok_or_else(|| Errors::MissingStageInput(stage.to_string(), "contours".into()))
        };

        Ok(match self {
            Function::ConvertColour => Output::image(Image::Gray(image()?.gray().into_owned())),
            Function::GaussianBlur => Output::image(Image::Gray(gaussian_blur(
                &image()?.gray(),
                args.odd("size")?,
            ))),
            Function::AdaptiveThreshold => Output::image(Image::Gray(adaptive_threshold(
                &image()?.gray(),
                args.odd("block_size")?,
                args.int("c")? as i32,
                args.choice("method")?,
            ))),
            Function::Morphology => Output::image(Image::Gray(morphology(
                &image()?.gray(),
                args.odd("ksize")?,
                args.choice("shape")?,
                args.choice("operation")?,
            ))),
            Function::ExtractContours => Output::contours(find_contours(
                &image()?.gray(),
                args.choice("mode")?,
                args.choice("method")?,
            )),
            Function::SizeFilter => Output::contours(size_filter(
                contours()?,
                args.int("minimum")? as f64,
                args.int("maximum")? as f64,
            )),
            Function::DrawContours => {
                let mut canvas = image()?.rgb().into_owned();
                draw_contours(
                    &mut canvas,
                    contours()?,
                    args.color("color")?,
                    args.int("thickness")? as u32,
                );
                Output::image(Image::Rgb(canvas))
            }
            Function::Preprocessing => Output::image(Image::Gray(gaussian_blur(
                &image()?.gray(),
                args.odd("blur_width")?,
            ))),
            Function::Postprocessing => {
                let opened = morphology(
                    &image()?.gray(),
                    args.odd("ksize")?,
                    KernelShape::Ellipse,
                    MorphOperation::Open,
                );
                let found = find_contours(&opened, RetrievalMode::Tree, Approximation::Simple);
                let kept = size_filter(&found, args.float("min_size")?, args.float("max_size")?);
                Output {
                    image: Some(Image::Gray(opened)),
                    contours: Some(kept),
                }
            }
        })
    }
}

struct Args<'a> {
    stage: &'a str,
    values: &'a Values,
}

impl<'a> Args<'a> {
    fn get(&self, name: &str) -> Result<&'a ParamValue> {
        self.values
            .get(name)
            .ok_or_else(|| Errors::UnknownParam(self.stage.to_string(), name.to_string()).into())
    }

    fn mismatch(&self, name: &str, expected: &str) -> anyhow::Error {
        Errors::InvalidParam(format!("{}.{}", self.stage, name), format!("expected {}", expected))
            .into()
    }

    fn int(&self, name: &str) -> Result<i64> {
        self.get(name)?
            .as_int()
            .ok_or_else(|| self.mismatch(name, "an integer"))
    }

    fn odd(&self, name: &str) -> Result<u32> {
        Ok((self.int(name)?.max(1) as u32) | 1)
    }

    fn float(&self, name: &str) -> Result<f64> {
        self.get(name)?
            .as_float()
            .ok_or_else(|| self.mismatch(name, "a number"))
    }

    fn color(&self, name: &str) -> Result<[u8; 3]> {
        self.get(name)?
            .as_color()
            .ok_or_else(|| self.mismatch(name, "a colour"))
    }

    fn choice<T: Choice>(&self, name: &str) -> Result<T> {
        self.get(name)?
            .as_choice()
            .and_then(T::parse)
            .ok_or_else(|| self.mismatch(name, "a known choice"))
    }
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Normalised 1D gaussian kernel, even sizes are rounded up to the next odd size
///
/// Sigma follows the kernel size: `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
///
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as i32;
    let kernel = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect::<Vec<_>>();
    let sum: f32 = kernel.iter().sum();
    kernel.into_iter().map(|k| k / sum).collect()
}

/// Gaussian blur with a square kernel of `size`, rounded up to odd; size 1 returns the
/// image unchanged
///
pub fn gaussian_blur(image: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return image.clone();
    }
    separable_filter_equal(image, &gaussian_kernel(size))
}

/// Inverted binary adaptive threshold
///
/// A pixel becomes 0 where it is brighter than the local mean minus `c`, 255 elsewhere,
/// so dark objects on a light background end up white.
///
/// # Parameters
/// * `block_size` - odd size of the neighbourhood the local mean is taken over
/// * `c` - constant subtracted from the local mean
/// * `method` - box or gaussian weighted mean
///
pub fn adaptive_threshold(
    image: &GrayImage,
    block_size: u32,
    c: i32,
    method: AdaptiveMethod,
) -> GrayImage {
    let mean = match method {
        AdaptiveMethod::Mean => box_filter(image, block_size / 2, block_size / 2),
        AdaptiveMethod::Gaussian => gaussian_blur(image, block_size),
    };
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let src = image.get_pixel(x, y)[0] as i32;
        let local = mean.get_pixel(x, y)[0] as i32;
        if src > local - c {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// `ksize` x `ksize` structuring element, included pixels are 255
///
pub fn structuring_element(shape: KernelShape, ksize: u32) -> GrayImage {
    let half = (ksize / 2) as i32;
    match shape {
        KernelShape::Rectangle => GrayImage::from_pixel(ksize, ksize, Luma([255])),
        KernelShape::Cross => GrayImage::from_fn(ksize, ksize, |x, y| {
            if x as i32 == half || y as i32 == half {
                Luma([255])
            } else {
                Luma([0])
            }
        }),
        KernelShape::Ellipse => {
            let r = half as f64;
            let inv_r2 = if half > 0 { 1.0 / (r * r) } else { 0.0 };
            GrayImage::from_fn(ksize, ksize, |x, y| {
                let dy = y as i32 - half;
                let dx = (r * ((r * r - (dy * dy) as f64) * inv_r2).max(0.0).sqrt()).round() as i32;
                if (x as i32 - half).abs() <= dx {
                    Luma([255])
                } else {
                    Luma([0])
                }
            })
        }
    }
}

/// Morphological operation with a centred structuring element
///
pub fn morphology(
    image: &GrayImage,
    ksize: u32,
    shape: KernelShape,
    operation: MorphOperation,
) -> GrayImage {
    let centre = (ksize / 2).min(u8::MAX as u32) as u8;
    let mask = Mask::from_image(&structuring_element(shape, ksize), centre, centre);
    let erode = |i: &GrayImage| grayscale_erode(i, &mask);
    let dilate = |i: &GrayImage| grayscale_dilate(i, &mask);

    match operation {
        MorphOperation::Open => dilate(&erode(image)),
        MorphOperation::Close => erode(&dilate(image)),
        MorphOperation::Gradient => difference(&dilate(image), &erode(image)),
        MorphOperation::TopHat => difference(image, &dilate(&erode(image))),
        MorphOperation::BlackHat => difference(&erode(&dilate(image)), image),
    }
}

fn difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].saturating_sub(b.get_pixel(x, y)[0])])
    })
}

/// Traces the borders of the non-zero regions of `binary`
///
pub fn find_contours(binary: &GrayImage, mode: RetrievalMode, method: Approximation) -> Vec<Contour> {
    let mut contours = imageproc::contours::find_contours::<i32>(binary)
        .into_iter()
        .map(|c| Contour {
            points: c.points,
            parent: c.parent,
            hole: c.border_type == BorderType::Hole,
        })
        .collect::<Vec<_>>();

    match mode {
        RetrievalMode::External => {
            contours.retain(|c| !c.hole && c.parent.is_none());
        }
        RetrievalMode::List => contours.iter_mut().for_each(|c| c.parent = None),
        RetrievalMode::Components => contours
            .iter_mut()
            .filter(|c| !c.hole)
            .for_each(|c| c.parent = None),
        RetrievalMode::Tree => {}
    }

    match method {
        Approximation::None => contours,
        Approximation::Simple => contours.iter().map(Contour::compress_segments).collect(),
        Approximation::Polygon => contours.iter().map(|c| c.simplify(1.0)).collect(),
    }
}

/// Keeps contours whose area lies in `minimum..=maximum`
///
/// Parent links are remapped to the kept contours; a parent that was dropped becomes `None`.
///
pub fn size_filter(contours: &[Contour], minimum: f64, maximum: f64) -> Vec<Contour> {
    let kept = contours
        .iter()
        .enumerate()
        .filter(|(_, c)| (minimum..=maximum).contains(&c.area()))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    let index = kept
        .iter()
        .enumerate()
        .map(|(new, old)| (*old, new))
        .collect::<HashMap<_, _>>();

    kept.iter()
        .map(|i| {
            let c = &contours[*i];
            Contour {
                parent: c.parent.and_then(|p| index.get(&p).copied()),
                ..c.clone()
            }
        })
        .collect()
}

/// Draws closed contours onto `image`
///
pub fn draw_contours(image: &mut RgbImage, contours: &[Contour], color: [u8; 3], thickness: u32) {
    let color = Rgb(color);
    let radius = (thickness / 2) as i32;
    for c in contours {
        let points = c
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect::<Vec<_>>();
        if points.is_empty() {
            continue;
        }
        let closing = points[0];
        let segments = points
            .iter()
            .zip(points.iter().skip(1).chain(std::iter::once(&closing)));
        for (start, end) in segments {
            if thickness <= 1 {
                draw_line_segment_mut(image, *start, *end, color);
            } else {
                for (x, y) in BresenhamLineIter::new(*start, *end) {
                    draw_filled_circle_mut(image, (x, y), radius, color);
                }
                draw_filled_circle_mut(image, (end.0 as i32, end.1 as i32), radius, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::contours::Contour;
    use crate::stack::functions::{
        adaptive_threshold, draw_contours, find_contours, gaussian_blur, gaussian_kernel,
        morphology, size_filter, structuring_element, AdaptiveMethod, Approximation, Choice,
        Function, Image, Input, KernelShape, MorphOperation, RetrievalMode,
    };
    use crate::stack::params::ParamValue;
    use crate::test_stuff::{dark_disks, BACKGROUND};
    use crate::Errors;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn blocks() -> GrayImage {
        // a ring (block with a hole) and a solid square
        GrayImage::from_fn(20, 12, |x, y| {
            let ring = (2..=9).contains(&x) && (2..=9).contains(&y);
            let hole = (5..=6).contains(&x) && (5..=6).contains(&y);
            let square = (12..=15).contains(&x) && (2..=5).contains(&y);
            if (ring && !hole) || square {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn kernel() {
        let k = gaussian_kernel(5);
        assert_eq!(k.len(), 5);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[4]).abs() < 1e-7);
        assert!(k[2] > k[1] && k[1] > k[0]);

        // even sizes round up
        assert_eq!(gaussian_kernel(4), k);
        assert_eq!(gaussian_kernel(0), vec![1.0]);
    }

    #[test]
    fn blur() {
        let flat = GrayImage::from_pixel(9, 9, Luma([BACKGROUND]));
        assert_eq!(gaussian_blur(&flat, 1), flat);
        let blurred = gaussian_blur(&flat, 5);
        assert!(blurred
            .pixels()
            .all(|p| (p[0] as i32 - BACKGROUND as i32).abs() <= 2));

        let mut dot = GrayImage::new(9, 9);
        dot.put_pixel(4, 4, Luma([255]));
        let spread = gaussian_blur(&dot, 5);
        assert!(spread.get_pixel(4, 4)[0] < 255);
        assert!(spread.get_pixel(5, 4)[0] > 0);
        assert_eq!(spread.get_pixel(0, 0)[0], 0);
        assert_eq!(gaussian_blur(&dot, 4), spread);
    }

    #[test]
    fn threshold_marks_dark_objects() {
        let gray = crate::stack::functions::to_gray(&dark_disks(64, 48, &[(20.0, 20.0, 6.0)]));
        for method in [AdaptiveMethod::Mean, AdaptiveMethod::Gaussian] {
            let binary = adaptive_threshold(&gray, 31, 10, method);
            assert_eq!(binary.get_pixel(20, 20)[0], 255);
            assert_eq!(binary.get_pixel(55, 40)[0], 0);
            assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
        }
    }

    #[test]
    fn elements() {
        let e = structuring_element(KernelShape::Ellipse, 5);
        let rows = (0..5)
            .map(|y| (0..5).filter(|x| e.get_pixel(*x, y)[0] == 255).count())
            .collect::<Vec<_>>();
        assert_eq!(rows, vec![1, 5, 5, 5, 1]);

        let c = structuring_element(KernelShape::Cross, 3);
        assert_eq!(c.get_pixel(0, 0)[0], 0);
        assert_eq!(c.get_pixel(1, 0)[0], 255);
        assert_eq!(c.get_pixel(0, 1)[0], 255);

        let r = structuring_element(KernelShape::Rectangle, 3);
        assert!(r.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn opening_removes_specks() {
        let mut img = GrayImage::new(16, 16);
        for x in 4..11 {
            for y in 4..11 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        img.put_pixel(1, 1, Luma([255]));

        let opened = morphology(&img, 3, KernelShape::Ellipse, MorphOperation::Open);
        assert_eq!(opened.get_pixel(1, 1)[0], 0);
        assert_eq!(opened.get_pixel(7, 7)[0], 255);

        let closed = morphology(&img, 3, KernelShape::Rectangle, MorphOperation::Close);
        assert_eq!(closed.get_pixel(7, 7)[0], 255);

        let gradient = morphology(&img, 3, KernelShape::Rectangle, MorphOperation::Gradient);
        assert_eq!(gradient.get_pixel(7, 7)[0], 0);
        assert_eq!(gradient.get_pixel(4, 7)[0], 255);

        let tophat = morphology(&img, 3, KernelShape::Ellipse, MorphOperation::TopHat);
        assert_eq!(tophat.get_pixel(1, 1)[0], 255);
        assert_eq!(tophat.get_pixel(7, 7)[0], 0);

        let identity = morphology(&img, 1, KernelShape::Ellipse, MorphOperation::BlackHat);
        assert!(identity.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn retrieval_modes() {
        let img = blocks();

        let tree = find_contours(&img, RetrievalMode::Tree, Approximation::None);
        assert_eq!(tree.len(), 3);
        let hole = tree.iter().position(|c| c.hole).unwrap();
        let parent = tree[hole].parent.unwrap();
        assert!(!tree[parent].hole);
        assert_eq!(tree[parent].bounds(), Some((2, 2, 9, 9)));

        let external = find_contours(&img, RetrievalMode::External, Approximation::None);
        assert_eq!(external.len(), 2);
        assert!(external.iter().all(|c| !c.hole && c.parent.is_none()));

        let list = find_contours(&img, RetrievalMode::List, Approximation::None);
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|c| c.parent.is_none()));

        let two = find_contours(&img, RetrievalMode::Components, Approximation::None);
        assert_eq!(two.len(), 3);
        assert!(two.iter().filter(|c| c.hole).all(|c| c.parent.is_some()));
    }

    #[test]
    fn approximations() {
        let img = blocks();
        let square = |cs: Vec<Contour>| {
            cs.into_iter()
                .find(|c| c.bounds() == Some((12, 2, 15, 5)))
                .unwrap()
        };
        let full = square(find_contours(&img, RetrievalMode::External, Approximation::None));
        assert_eq!(full.len(), 12);
        let simple = square(find_contours(&img, RetrievalMode::External, Approximation::Simple));
        assert_eq!(simple.len(), 4);
        let polygon = square(find_contours(&img, RetrievalMode::External, Approximation::Polygon));
        assert_eq!(polygon.len(), 4);
    }

    #[test]
    fn filter_by_area() {
        let contours = find_contours(&blocks(), RetrievalMode::Tree, Approximation::Simple);
        let big = size_filter(&contours, 20.0, 1000.0);
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].bounds(), Some((2, 2, 9, 9)));
        assert_eq!(big[0].parent, None);

        let all = size_filter(&contours, 0.0, 1000.0);
        assert_eq!(all.len(), 3);
        let hole = all.iter().find(|c| c.hole).unwrap();
        assert_eq!(all[hole.parent.unwrap()].bounds(), Some((2, 2, 9, 9)));
    }

    #[test]
    fn drawing() {
        let mut img = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let square = Contour::from_coords(&[(5, 5), (14, 5), (14, 14), (5, 14)]);
        draw_contours(&mut img, &[square.clone()], [255, 0, 0], 1);
        assert_eq!(*img.get_pixel(10, 5), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(5, 10), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));

        let mut thick = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        draw_contours(&mut thick, &[square], [0, 255, 0], 3);
        assert_eq!(*thick.get_pixel(10, 6), Rgb([0, 255, 0]));
        assert_eq!(*thick.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn choices() {
        assert_eq!(RetrievalMode::parse("ccomp"), Some(RetrievalMode::Components));
        assert_eq!(Approximation::parse("tc89"), None);
        let p = MorphOperation::param("Operation");
        assert_eq!(p.default, ParamValue::Choice("open".into()));
    }

    #[test]
    fn apply_needs_inputs() {
        let err = Function::SizeFilter
            .apply("size_filter", Input::default(), &Function::SizeFilter.defaults())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::MissingStageInput(
                "size_filter".into(),
                "contours".into()
            ))
        );

        let frame = Image::Rgb(dark_disks(64, 48, &[(20.0, 20.0, 6.0)]));
        let mut values = Function::GaussianBlur.defaults();
        values.remove("size");
        let err = Function::GaussianBlur
            .apply(
                "gaussian_blur",
                Input {
                    image: Some(&frame),
                    contours: None,
                },
                &values,
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::UnknownParam(_, p)) if p == "size"
        ));
    }

    #[test]
    fn postprocessing() {
        let gray = crate::stack::functions::to_gray(&dark_disks(
            64,
            48,
            &[(20.0, 20.0, 6.0), (45.0, 30.0, 7.0)],
        ));
        let binary = Image::Gray(adaptive_threshold(&gray, 31, 10, AdaptiveMethod::Mean));
        let out = Function::Postprocessing
            .apply(
                "postprocessing",
                Input {
                    image: Some(&binary),
                    contours: None,
                },
                &Function::Postprocessing.defaults(),
            )
            .unwrap();
        assert!(out.image.is_some());
        let contours = out.contours.unwrap();
        assert_eq!(contours.iter().filter(|c| !c.hole).count(), 2);
    }
}
