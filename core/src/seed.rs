use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::db::Database;
use crate::models::{NewIngredient, NewTag, validate_new_ingredient, validate_new_tag};

pub const TAGS_FILE: &str = "tags.csv";
pub const INGREDIENTS_FILE: &str = "ingredients.csv";

/// Counts of what a seed run created or found already present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub tags_parsed: usize,
    pub tags_created: usize,
    pub tags_reused: usize,
    pub ingredients_parsed: usize,
    pub ingredients_created: usize,
    pub ingredients_reused: usize,
}

fn reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Parse and validate headerless `name,color,slug` rows.
pub fn parse_tags_csv<R: Read>(input: R) -> Result<Vec<NewTag>> {
    let mut rows = Vec::new();
    for result in reader(input).records() {
        let record = result.context("Failed to parse tags CSV")?;
        let line = record.position().map_or(0, csv::Position::line);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let [name, color, slug] = fields::<3>(&record)
            .with_context(|| format!("tags CSV line {line}: expected name,color,slug"))?;
        let tag = NewTag {
            name: name.to_string(),
            color: color.to_string(),
            slug: slug.to_string(),
        };
        validate_new_tag(&tag).with_context(|| format!("tags CSV line {line}"))?;
        rows.push(tag);
    }
    Ok(rows)
}

/// Parse and validate headerless `name,measurement_unit` rows.
pub fn parse_ingredients_csv<R: Read>(input: R) -> Result<Vec<NewIngredient>> {
    let mut rows = Vec::new();
    for result in reader(input).records() {
        let record = result.context("Failed to parse ingredients CSV")?;
        let line = record.position().map_or(0, csv::Position::line);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let [name, unit] = fields::<2>(&record).with_context(|| {
            format!("ingredients CSV line {line}: expected name,measurement_unit")
        })?;
        let ingredient = NewIngredient {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
        };
        validate_new_ingredient(&ingredient)
            .with_context(|| format!("ingredients CSV line {line}"))?;
        rows.push(ingredient);
    }
    Ok(rows)
}

fn fields<const N: usize>(record: &csv::StringRecord) -> Result<[&str; N]> {
    if record.len() != N {
        bail!("found {} fields", record.len());
    }
    let mut out = [""; N];
    for (slot, value) in out.iter_mut().zip(record.iter()) {
        if value.is_empty() {
            bail!("empty field");
        }
        *slot = value;
    }
    Ok(out)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Seed file not found: {}", path.display()))
}

/// Load tags and ingredients into the database with get-or-create semantics,
/// so running it twice changes nothing. Both files are parsed and validated
/// before anything is written, and the writes share one transaction. When
/// `dry_run` is true, nothing is written.
pub fn load_initial_data(
    db: &Database,
    tags_path: &Path,
    ingredients_path: &Path,
    dry_run: bool,
) -> Result<SeedSummary> {
    let tags = parse_tags_csv(open(tags_path)?)
        .with_context(|| format!("Failed to read {}", tags_path.display()))?;
    let ingredients = parse_ingredients_csv(open(ingredients_path)?)
        .with_context(|| format!("Failed to read {}", ingredients_path.display()))?;

    let mut summary = SeedSummary {
        tags_parsed: tags.len(),
        ingredients_parsed: ingredients.len(),
        ..SeedSummary::default()
    };

    if dry_run {
        preview(db, &tags, &ingredients, &mut summary)?;
    } else {
        db.in_transaction(|db| write(db, &tags, &ingredients, &mut summary))?;
    }

    tracing::info!(
        file = %tags_path.display(),
        created = summary.tags_created,
        reused = summary.tags_reused,
        dry_run,
        "tags loaded"
    );
    tracing::info!(
        file = %ingredients_path.display(),
        created = summary.ingredients_created,
        reused = summary.ingredients_reused,
        dry_run,
        "ingredients loaded"
    );

    Ok(summary)
}

fn write(
    db: &Database,
    tags: &[NewTag],
    ingredients: &[NewIngredient],
    summary: &mut SeedSummary,
) -> Result<()> {
    for tag in tags {
        let (_, created) = db
            .get_or_create_tag(tag)
            .with_context(|| format!("Failed to load tag '{}'", tag.slug))?;
        if created {
            summary.tags_created += 1;
        } else {
            summary.tags_reused += 1;
        }
    }
    for ingredient in ingredients {
        let (_, created) = db
            .get_or_create_ingredient(ingredient)
            .with_context(|| format!("Failed to load ingredient '{}'", ingredient.name))?;
        if created {
            summary.ingredients_created += 1;
        } else {
            summary.ingredients_reused += 1;
        }
    }
    Ok(())
}

/// Counts what `write` would do. Rows repeated within a file count as reused.
fn preview(
    db: &Database,
    tags: &[NewTag],
    ingredients: &[NewIngredient],
    summary: &mut SeedSummary,
) -> Result<()> {
    let mut seen = HashSet::new();
    for tag in tags {
        let fresh = seen.insert(tag.slug.as_str()) && db.find_tag_by_slug(&tag.slug)?.is_none();
        if fresh {
            summary.tags_created += 1;
        } else {
            summary.tags_reused += 1;
        }
    }

    let mut seen = HashSet::new();
    for ingredient in ingredients {
        let key = (ingredient.name.as_str(), ingredient.measurement_unit.as_str());
        let fresh = seen.insert(key)
            && db
                .find_ingredient(&ingredient.name, &ingredient.measurement_unit)?
                .is_none();
        if fresh {
            summary.ingredients_created += 1;
        } else {
            summary.ingredients_reused += 1;
        }
    }
    Ok(())
}
