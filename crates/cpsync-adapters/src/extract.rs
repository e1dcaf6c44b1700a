use scraper::{ElementRef, Html, Selector};

const STATEMENT_SELECTOR: &str = ".problem-statement";
const BLOCK_SELECTOR: &str = "p, li, pre, .section-title";

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_header(element: ElementRef<'_>) -> bool {
    element.value().classes().any(|c| c == "header")
}

fn is_block(element: ElementRef<'_>) -> bool {
    matches!(element.value().name(), "p" | "li" | "pre")
        || element.value().classes().any(|c| c == "section-title")
}

/// Collects statement text in document order.
///
/// Blocks are emitted whole; containers holding blocks are walked; any other
/// element or bare text run becomes its own line.
fn collect_blocks(container: ElementRef<'_>, block_sel: &Selector, out: &mut Vec<String>) {
    for child in container.children() {
        if let Some(text) = child.value().as_text() {
            let text = collapse_whitespace(text);
            if !text.is_empty() {
                out.push(text);
            }
            continue;
        }
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };
        if is_header(element) || matches!(element.value().name(), "script" | "style") {
            continue;
        }

        let text = if is_block(element) {
            block_text(element)
        } else if element.select(block_sel).next().is_some() {
            collect_blocks(element, block_sel, out);
            continue;
        } else {
            collapse_whitespace(&element.text().collect::<String>())
        };
        if !text.is_empty() {
            out.push(text);
        }
    }
}

fn block_text(block: ElementRef<'_>) -> String {
    if block.value().name() == "pre" {
        block
            .text()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        collapse_whitespace(&block.text().collect::<String>())
    }
}

/// Extracts the plain-text statement from a problem page.
///
/// Returns `None` when the page has no statement container or the container
/// holds no text outside its header (title, limits).
pub fn extract_statement(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let statement_sel = Selector::parse(STATEMENT_SELECTOR).ok()?;
    let block_sel = Selector::parse(BLOCK_SELECTOR).ok()?;
    let statement = document.select(&statement_sel).next()?;

    let mut blocks = Vec::new();
    collect_blocks(statement, &block_sel, &mut blocks);

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n"))
    }
}
