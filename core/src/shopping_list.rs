//! Shopping-list pipeline: cart lines are aggregated per `(name, unit)` and
//! rendered into a paginated PDF.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use printpdf::{Mm, PdfDocument, Pt};
use serde::Serialize;
use ttf_parser::Face;

use crate::db::Database;
use crate::error::DomainError;

pub const SHOPPING_LIST_FILENAME: &str = "shopping_list.pdf";
pub const CONTENT_TYPE: &str = "application/pdf";

pub const PAGE_WIDTH_PT: f32 = 595.0;
pub const PAGE_HEIGHT_PT: f32 = 842.0;
pub const HEADER_TEXT: &str = "Shopping List";
pub const HEADER_X_PT: f32 = 200.0;
pub const HEADER_Y_PT: f32 = 800.0;
pub const HEADER_SIZE: f32 = 24.0;
pub const ROW_X_PT: f32 = 75.0;
pub const FIRST_ROW_Y_PT: f32 = 750.0;
pub const CONTINUATION_ROW_Y_PT: f32 = 800.0;
pub const ROW_SPACING_PT: f32 = 25.0;
pub const ROW_SIZE: f32 = 16.0;
pub const BOTTOM_MARGIN_PT: f32 = 50.0;

/// One ingredient quantity of one recipe in a user's cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientLine {
    pub recipe_id: i64,
    pub name: String,
    pub measurement_unit: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedLine {
    pub name: String,
    pub measurement_unit: String,
    pub total: u64,
}

impl AggregatedLine {
    #[must_use]
    pub fn row_text(&self, index: usize) -> String {
        format!(
            "{index}. {} - {} {}",
            self.name, self.total, self.measurement_unit
        )
    }
}

/// Sums amounts per `(name, measurement_unit)`, keeping the order in which
/// each key first appears.
#[must_use]
pub fn aggregate(lines: &[IngredientLine]) -> Vec<AggregatedLine> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut out: Vec<AggregatedLine> = Vec::new();

    for line in lines {
        let key = (line.name.as_str(), line.measurement_unit.as_str());
        if let Some(&pos) = index.get(&key) {
            out[pos].total += u64::from(line.amount);
        } else {
            index.insert(key, out.len());
            out.push(AggregatedLine {
                name: line.name.clone(),
                measurement_unit: line.measurement_unit.clone(),
                total: u64::from(line.amount),
            });
        }
    }

    out
}

// --- Layout ---

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageLayout {
    pub lines: Vec<TextLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    pub pages: Vec<PageLayout>,
}

impl DocumentLayout {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.pages.iter().map(|p| p.lines.len()).sum::<usize>() - 1
    }
}

/// Positions the header and one row per aggregated line, in points from the
/// bottom-left corner. Rows that would cross the bottom margin move to a new
/// page without a header.
#[must_use]
pub fn layout(items: &[AggregatedLine]) -> DocumentLayout {
    let mut current = PageLayout {
        lines: vec![TextLine {
            text: HEADER_TEXT.to_string(),
            x: HEADER_X_PT,
            y: HEADER_Y_PT,
            size: HEADER_SIZE,
        }],
    };
    let mut pages = Vec::new();
    let mut y = FIRST_ROW_Y_PT;

    for (i, item) in items.iter().enumerate() {
        if y < BOTTOM_MARGIN_PT {
            pages.push(std::mem::take(&mut current));
            y = CONTINUATION_ROW_Y_PT;
        }
        current.lines.push(TextLine {
            text: item.row_text(i + 1),
            x: ROW_X_PT,
            y,
            size: ROW_SIZE,
        });
        y -= ROW_SPACING_PT;
    }
    pages.push(current);

    DocumentLayout { pages }
}

// --- Rendering ---

/// DejaVu Sans, embedded when no other font is configured.
pub const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Where the document's font comes from. Either way the TrueType data is
/// embedded into the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FontSource {
    #[default]
    Bundled,
    File(PathBuf),
}

impl FontSource {
    fn label(&self) -> String {
        match self {
            Self::Bundled => "bundled DejaVu Sans".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }

    fn bytes(&self) -> Result<Cow<'static, [u8]>> {
        match self {
            Self::Bundled => Ok(Cow::Borrowed(BUNDLED_FONT)),
            Self::File(path) => std::fs::read(path).map(Cow::Owned).map_err(|e| {
                DomainError::ResourceUnavailable(format!("font {}: {e}", path.display())).into()
            }),
        }
    }
}

/// Fails on the first character of `layout` that `face` has no glyph for.
fn check_glyph_coverage(face: &Face<'_>, layout: &DocumentLayout, label: &str) -> Result<()> {
    let missing = layout
        .pages
        .iter()
        .flat_map(|page| &page.lines)
        .flat_map(|line| line.text.chars())
        .find(|&c| face.glyph_index(c).is_none());
    match missing {
        Some(c) => Err(DomainError::ResourceUnavailable(format!(
            "font {label} has no glyph for {c:?}"
        ))
        .into()),
        None => Ok(()),
    }
}

fn pt(value: f32) -> Mm {
    Mm::from(Pt(value))
}

/// Renders `layout` to PDF bytes. Nothing is returned on failure, including
/// when the font cannot draw every character.
pub fn render_pdf(layout: &DocumentLayout, font: &FontSource) -> Result<Vec<u8>> {
    let label = font.label();
    let bytes = font.bytes()?;
    let face = Face::parse(&bytes, 0)
        .map_err(|e| DomainError::ResourceUnavailable(format!("font {label}: {e}")))?;
    check_glyph_coverage(&face, layout, &label)?;

    let (doc, first_page, first_layer) = PdfDocument::new(
        HEADER_TEXT,
        pt(PAGE_WIDTH_PT),
        pt(PAGE_HEIGHT_PT),
        "Layer 1",
    );
    let font_ref = doc
        .add_external_font(&*bytes)
        .map_err(|e| DomainError::ResourceUnavailable(format!("font {label}: {e:?}")))?;

    for (n, page) in layout.pages.iter().enumerate() {
        let (page_idx, layer_idx) = if n == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(pt(PAGE_WIDTH_PT), pt(PAGE_HEIGHT_PT), "Layer 1")
        };
        let layer = doc.get_page(page_idx).get_layer(layer_idx);
        for line in &page.lines {
            layer.use_text(line.text.as_str(), line.size, pt(line.x), pt(line.y), &font_ref);
        }
    }

    doc.save_to_bytes()
        .map_err(|e| DomainError::ResourceUnavailable(format!("pdf output: {e:?}")).into())
}

/// The rendered shopping list of one user.
#[derive(Debug)]
pub struct ShoppingList {
    pub items: Vec<AggregatedLine>,
    pub pages: usize,
    pub pdf: Vec<u8>,
}

impl ShoppingList {
    /// Reads the user's cart, aggregates it and renders the PDF.
    pub fn for_user(db: &Database, user_id: i64, font: &FontSource) -> Result<Self> {
        let lines = db.cart_ingredient_lines(user_id)?;
        Self::from_lines(user_id, &lines, font)
    }

    /// Aggregate and render lines already read from the cart.
    pub fn from_lines(user_id: i64, lines: &[IngredientLine], font: &FontSource) -> Result<Self> {
        let items = aggregate(lines);
        let doc = layout(&items);
        let pdf = render_pdf(&doc, font)?;
        tracing::info!(
            user_id,
            lines = lines.len(),
            items = items.len(),
            pages = doc.pages.len(),
            bytes = pdf.len(),
            "shopping list rendered"
        );
        Ok(Self {
            items,
            pages: doc.pages.len(),
            pdf,
        })
    }
}
