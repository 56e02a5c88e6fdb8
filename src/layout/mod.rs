use crate::generator::ContentAtom;
use crate::utils::{short_hash, strip_tags};
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Serialize;

/// The closed set of block templates the renderer knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Hero,
    Cards,
    FaqAccordion,
    CtaSection,
    StepByStep,
    Columns,
    VideoGallery,
}

impl BlockKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hero" => Some(Self::Hero),
            "cards" => Some(Self::Cards),
            "faq-accordion" => Some(Self::FaqAccordion),
            "cta-section" => Some(Self::CtaSection),
            "step-by-step" => Some(Self::StepByStep),
            "columns" => Some(Self::Columns),
            "video-gallery" => Some(Self::VideoGallery),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hero => "hero",
            Self::Cards => "cards",
            Self::FaqAccordion => "faq-accordion",
            Self::CtaSection => "cta-section",
            Self::StepByStep => "step-by-step",
            Self::Columns => "columns",
            Self::VideoGallery => "video-gallery",
        }
    }

    fn section_style(self) -> Option<&'static str> {
        match self {
            Self::CtaSection => Some("highlight"),
            Self::FaqAccordion => Some("light"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedBlock {
    pub name: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_style: Option<String>,
    pub non_empty: bool,
}

#[derive(Debug, Default)]
pub struct LayoutResult {
    pub blocks: Vec<RenderedBlock>,
    pub skipped: usize,
}

/// A fragment is empty when nothing but markup survives tag stripping.
pub fn is_empty(html: &str) -> bool {
    strip_tags(html).trim().is_empty()
}

/// Image hint marker embedded in a rendered `<img>` tag. The id is a stable
/// hash of slug and prompt so re-renders reuse the same blob key.
fn image_marker(slug: &str, prompt: &str, size: &str, alt: &str) -> String {
    // Angle brackets never belong in a prompt and would confuse the tag
    // scanner downstream.
    let prompt = prompt.replace(['<', '>'], " ");
    let prompt = prompt.as_str();
    let id = short_hash(&format!("{slug}:{prompt}"));
    format!(
        "<img class=\"gen-image {size}\" data-image-id=\"{id}\" data-image-prompt=\"{}\" src=\"/images/{slug}/{id}.png\" alt=\"{}\">",
        encode_double_quoted_attribute(prompt),
        encode_double_quoted_attribute(alt),
    )
}

/// Render the suggested blocks from the atom set. Unknown names and blocks
/// that render empty are dropped and counted; duplicate suggestions keep
/// their first occurrence. The first hero always leads, the first
/// cta-section always closes.
pub fn render_blocks(atoms: &[ContentAtom], suggested: &[String], slug: &str) -> LayoutResult {
    let mut rendered: Vec<RenderedBlock> = Vec::new();
    let mut skipped = 0usize;
    let mut seen: Vec<BlockKind> = Vec::new();

    for name in suggested {
        let Some(kind) = BlockKind::parse(name) else {
            skipped += 1;
            continue;
        };
        if seen.contains(&kind) {
            skipped += 1;
            continue;
        }
        seen.push(kind);

        let html = render_block(kind, atoms, slug);
        if is_empty(&html) {
            skipped += 1;
            continue;
        }
        rendered.push(RenderedBlock {
            name: kind.name().to_string(),
            html,
            section_style: kind.section_style().map(str::to_string),
            non_empty: true,
        });
    }

    reorder(&mut rendered);
    LayoutResult {
        blocks: rendered,
        skipped,
    }
}

/// Hero first, CTA last, everything else in suggested order.
fn reorder(blocks: &mut Vec<RenderedBlock>) {
    if let Some(pos) = blocks.iter().position(|b| b.name == "hero")
        && pos != 0
    {
        let hero = blocks.remove(pos);
        blocks.insert(0, hero);
    }
    if let Some(pos) = blocks.iter().position(|b| b.name == "cta-section")
        && pos != blocks.len() - 1
    {
        let cta = blocks.remove(pos);
        blocks.push(cta);
    }
}

fn render_block(kind: BlockKind, atoms: &[ContentAtom], slug: &str) -> String {
    match kind {
        BlockKind::Hero => render_hero(atoms, slug),
        BlockKind::Cards => render_cards(atoms, slug),
        BlockKind::FaqAccordion => render_faqs(atoms),
        BlockKind::CtaSection => render_cta(atoms),
        BlockKind::StepByStep => render_steps(atoms),
        BlockKind::Columns => render_columns(atoms, slug),
        BlockKind::VideoGallery => render_videos(atoms),
    }
}

fn render_hero(atoms: &[ContentAtom], slug: &str) -> String {
    let Some(ContentAtom::Hero {
        title,
        subtitle,
        cta_text,
        image_hint,
    }) = atoms
        .iter()
        .find(|a| matches!(a, ContentAtom::Hero { .. }))
    else {
        return String::new();
    };

    let mut html = String::from("<div class=\"hero-inner\">");
    if let Some(hint) = image_hint {
        html.push_str(&image_marker(slug, hint, "hero", title));
    }
    html.push_str(&format!("<h1>{}</h1>", encode_text(title)));
    if let Some(subtitle) = subtitle {
        html.push_str(&format!("<p>{}</p>", encode_text(subtitle)));
    }
    if let Some(cta) = cta_text {
        html.push_str(&format!(
            "<a class=\"button primary\" href=\"#cta\">{}</a>",
            encode_text(cta)
        ));
    }
    html.push_str("</div>");
    html
}

fn render_cards(atoms: &[ContentAtom], slug: &str) -> String {
    let cards: Vec<String> = atoms
        .iter()
        .filter_map(|a| match a {
            ContentAtom::Card {
                title,
                body,
                image_hint,
                href,
            } => {
                let mut card = String::from("<li class=\"card\">");
                if let Some(hint) = image_hint {
                    card.push_str(&image_marker(slug, hint, "card", title));
                }
                card.push_str(&format!("<h3>{}</h3>", encode_text(title)));
                card.push_str(&format!("<p>{}</p>", encode_text(body)));
                if let Some(href) = href {
                    card.push_str(&format!(
                        "<a href=\"{}\">Learn more</a>",
                        encode_double_quoted_attribute(href)
                    ));
                }
                card.push_str("</li>");
                Some(card)
            }
            _ => None,
        })
        .collect();

    if cards.is_empty() {
        return String::new();
    }
    format!("<ul class=\"card-list\">{}</ul>", cards.join(""))
}

fn render_faqs(atoms: &[ContentAtom]) -> String {
    let items: Vec<String> = atoms
        .iter()
        .filter_map(|a| match a {
            ContentAtom::Faq { question, answer } => Some(format!(
                "<details><summary>{}</summary><p>{}</p></details>",
                encode_text(question),
                encode_text(answer)
            )),
            _ => None,
        })
        .collect();
    items.join("")
}

fn render_cta(atoms: &[ContentAtom]) -> String {
    let Some(ContentAtom::Cta {
        title,
        body,
        cta_text,
        href,
    }) = atoms.iter().find(|a| matches!(a, ContentAtom::Cta { .. }))
    else {
        return String::new();
    };

    let mut html = format!("<h2>{}</h2>", encode_text(title));
    if let Some(body) = body {
        html.push_str(&format!("<p>{}</p>", encode_text(body)));
    }
    html.push_str(&format!(
        "<a class=\"button primary\" href=\"{}\">{}</a>",
        encode_double_quoted_attribute(href.as_deref().unwrap_or("#")),
        encode_text(cta_text)
    ));
    html
}

fn render_steps(atoms: &[ContentAtom]) -> String {
    let Some(ContentAtom::StepList { title, steps }) = atoms
        .iter()
        .find(|a| matches!(a, ContentAtom::StepList { .. }))
    else {
        return String::new();
    };
    if steps.is_empty() {
        return String::new();
    }

    let mut html = String::new();
    if let Some(title) = title {
        html.push_str(&format!("<h2>{}</h2>", encode_text(title)));
    }
    html.push_str("<ol class=\"steps\">");
    for step in steps {
        html.push_str(&format!("<li>{}</li>", encode_text(step)));
    }
    html.push_str("</ol>");
    html
}

fn render_columns(atoms: &[ContentAtom], slug: &str) -> String {
    let columns: Vec<String> = atoms
        .iter()
        .filter_map(|a| match a {
            ContentAtom::Column {
                title,
                body,
                image_hint,
            } => {
                let mut col = String::from("<div class=\"column\">");
                if let Some(hint) = image_hint {
                    col.push_str(&image_marker(slug, hint, "column", title));
                }
                col.push_str(&format!("<h3>{}</h3>", encode_text(title)));
                col.push_str(&format!("<p>{}</p>", encode_text(body)));
                col.push_str("</div>");
                Some(col)
            }
            _ => None,
        })
        .collect();
    columns.join("")
}

fn render_videos(atoms: &[ContentAtom]) -> String {
    let videos: Vec<String> = atoms
        .iter()
        .filter_map(|a| match a {
            ContentAtom::Video { title, url } => Some(format!(
                "<li><a href=\"{}\">{}</a></li>",
                encode_double_quoted_attribute(url),
                encode_text(title)
            )),
            _ => None,
        })
        .collect();
    if videos.is_empty() {
        return String::new();
    }
    format!("<ul class=\"video-list\">{}</ul>", videos.join(""))
}

/// Assemble the persistence wire format: an HTML5 document whose `<main>`
/// holds one `<div>` per section, the block as first child, and an optional
/// section-metadata cell carrying the style.
pub fn page_document(title: &str, blocks: &[RenderedBlock]) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<html>\n<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", encode_text(title)));
    out.push_str("  <meta charset=\"utf-8\">\n</head>\n<body>\n<main>\n");
    for block in blocks {
        out.push_str("  <div>\n");
        out.push_str(&format!(
            "    <div class=\"{}\">{}</div>\n",
            block.name, block.html
        ));
        if let Some(style) = &block.section_style {
            out.push_str(&format!(
                "    <div class=\"section-metadata\"><div><div>style</div><div>{}</div></div></div>\n",
                encode_text(style)
            ));
        }
        out.push_str("  </div>\n");
    }
    out.push_str("</main>\n</body>\n</html>\n");
    out
}
