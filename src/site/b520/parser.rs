//! Markup parsing for b520 (biquge-family layout).

use regex::Regex;
use scraper::{Html, Selector};

use crate::models::{BookInfo, ChapterRecord, ChapterRef, Volume};
use crate::site::Parser;

/// Chapter-body lines that are site chrome, not prose.
const AD_LINE_PATTERN: &str = r"(笔趣阁|b520\.cc|天才一秒记住|手机阅读)";

/// Parser for b520 info and chapter pages.
pub struct B520Parser;

impl Parser for B520Parser {
    fn site_name(&self) -> &'static str {
        super::SITE_NAME
    }

    fn parse_book_info(&self, pages: &[String]) -> Option<BookInfo> {
        let page = pages.first()?;
        let doc = Html::parse_document(page);

        let book_name = first_text(&doc, "#info h1")?;
        if book_name.is_empty() {
            return None;
        }

        let mut author = String::new();
        let mut update_time = String::new();
        if let Ok(sel) = Selector::parse("#info p") {
            for p in doc.select(&sel) {
                let text = collect_text(p);
                if let Some(value) = text.strip_prefix("作\u{3000}\u{3000}者：") {
                    author = value.trim().to_string();
                } else if let Some(value) = text.strip_prefix("作者：") {
                    author = value.trim().to_string();
                } else if let Some(value) = text.strip_prefix("最后更新：") {
                    update_time = value.trim().to_string();
                }
            }
        }

        let summary = first_text(&doc, "#intro").unwrap_or_default();
        let cover_url = Selector::parse("#fmimg img")
            .ok()
            .and_then(|sel| {
                doc.select(&sel)
                    .next()
                    .and_then(|el| el.value().attr("src").map(str::to_string))
            })
            .unwrap_or_default();

        let mut chapters = Vec::new();
        if let Ok(sel) = Selector::parse("#list dd a") {
            for link in doc.select(&sel) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                let Some(chapter_id) = chapter_id_from_href(href) else {
                    continue;
                };
                chapters.push(ChapterRef {
                    chapter_id,
                    title: collect_text(link),
                    url: href.to_string(),
                });
            }
        }

        Some(BookInfo {
            book_name,
            author,
            cover_url,
            summary,
            tags: Vec::new(),
            update_time,
            volumes: vec![Volume {
                volume_name: "正文".to_string(),
                chapters,
            }],
        })
    }

    fn parse_chapter(&self, pages: &[String], chapter_id: &str) -> Option<ChapterRecord> {
        let page = pages.first()?;
        let doc = Html::parse_document(page);

        let title = first_text(&doc, ".bookname h1").unwrap_or_default();

        let Ok(sel) = Selector::parse("#content") else {
            return None;
        };
        let content_el = doc.select(&sel).next()?;

        let ad_line = Regex::new(AD_LINE_PATTERN).ok();
        let mut paragraphs: Vec<String> = Vec::new();
        for chunk in content_el.text() {
            let line = chunk.trim().trim_start_matches('\u{3000}').trim();
            if line.is_empty() {
                continue;
            }
            if ad_line.as_ref().is_some_and(|re| re.is_match(line)) {
                continue;
            }
            paragraphs.push(line.to_string());
        }

        if title.is_empty() && paragraphs.is_empty() {
            return None;
        }

        Some(ChapterRecord {
            id: chapter_id.to_string(),
            title,
            content: paragraphs.join("\n\n"),
            need_refetch: false,
            extra: crate::models::ExtraMap::new(),
        })
    }
}

/// Extracts the chapter id from hrefs like `/8_8187/5544018.html`.
fn chapter_id_from_href(href: &str) -> Option<String> {
    let name = href.rsplit('/').next()?;
    let stem = name.strip_suffix(".html")?;
    (!stem.is_empty()).then(|| stem.to_string())
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().map(collect_text)
}

fn collect_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
