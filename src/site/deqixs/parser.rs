//! Markup parsing for deqixs pages.

use scraper::{Html, Selector};

use crate::models::{BookInfo, ChapterRecord, ChapterRef, Volume};
use crate::site::Parser;

/// Lines of site chrome injected into chapter bodies.
const AD_MARKERS: [&str; 3] = ["deqixs.com", "得奇小说网", "最新网址"];

/// Parser for deqixs info and chapter pages.
pub struct DeqixsParser;

impl DeqixsParser {
    fn select_first_text(doc: &Html, selector: &str) -> Option<String> {
        let Ok(sel) = Selector::parse(selector) else {
            return None;
        };
        doc.select(&sel).next().map(|el| collect_text(el))
    }
}

impl Parser for DeqixsParser {
    fn site_name(&self) -> &'static str {
        super::SITE_NAME
    }

    fn parse_book_info(&self, pages: &[String]) -> Option<BookInfo> {
        let page = pages.first()?;
        let doc = Html::parse_document(page);

        let book_name = Self::select_first_text(&doc, "div.itemtxt h1 a")?;
        if book_name.is_empty() {
            return None;
        }

        let author = Self::select_first_text(&doc, "div.itemtxt p a").unwrap_or_default();
        let summary = Self::select_first_text(&doc, "div.des p").unwrap_or_default();
        let update_time = Self::select_first_text(&doc, "span.date").unwrap_or_default();
        let cover_url = Selector::parse("div.item img")
            .ok()
            .and_then(|sel| {
                doc.select(&sel)
                    .next()
                    .and_then(|el| el.value().attr("src").map(str::to_string))
            })
            .unwrap_or_default();

        let mut chapters = Vec::new();
        if let Ok(sel) = Selector::parse("div#list ul li a") {
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
        let mut title = String::new();
        let mut paragraphs: Vec<String> = Vec::new();

        for (index, page) in pages.iter().enumerate() {
            let doc = Html::parse_document(page);

            if index == 0 {
                title = Self::select_first_text(&doc, "h1").unwrap_or_default();
                // Continuation pages repeat the title with a page marker;
                // keep the first page's form.
            }

            let Ok(sel) = Selector::parse("div.con p") else {
                return None;
            };
            for p in doc.select(&sel) {
                let text = collect_text(p);
                if text.is_empty() || AD_MARKERS.iter().any(|m| text.contains(m)) {
                    continue;
                }
                paragraphs.push(text);
            }
        }

        if title.is_empty() && paragraphs.is_empty() {
            return None;
        }

        Some(ChapterRecord {
            id: chapter_id.to_string(),
            title: strip_page_marker(&title),
            content: paragraphs.join("\n\n"),
            need_refetch: false,
            extra: crate::models::ExtraMap::new(),
        })
    }
}

/// Extracts the chapter id from hrefs like `/xiaoshuo/123/4567.html` or
/// `4567.html`.
fn chapter_id_from_href(href: &str) -> Option<String> {
    let name = href.rsplit('/').next()?;
    let stem = name.strip_suffix(".html")?;
    // Continuation pages (`4567-2.html`) never appear in catalogs, but be
    // strict anyway.
    let stem = stem.split('-').next()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Drops trailing pagination markers like `(2/3)` from repeated titles.
fn strip_page_marker(title: &str) -> String {
    match title.rfind('(') {
        Some(pos) if title.ends_with(')') && title[pos..].contains('/') => {
            title[..pos].trim_end().to_string()
        }
        _ => title.trim().to_string(),
    }
}

fn collect_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INFO_PAGE: &str = r#"
        <html><body>
          <div class="item"><img src="/files/cover/123.jpg"></div>
          <div class="itemtxt">
            <h1><a href="/xiaoshuo/123/">测试之书</a></h1>
            <p><a href="/author/zuozhe/">作者名</a><span class="date">2024-03-01</span></p>
          </div>
          <div class="des"><p>一段简介。</p></div>
          <div id="list">
            <ul>
              <li><a href="/xiaoshuo/123/1001.html">第一章 开端</a></li>
              <li><a href="/xiaoshuo/123/1002.html">第二章 再起</a></li>
              <li><a href="/xiaoshuo/123/1003.html">第三章 收束</a></li>
            </ul>
          </div>
        </body></html>"#;

    #[test]
    fn test_parse_book_info_extracts_catalog_in_order() {
        let parser = DeqixsParser;
        let info = parser
            .parse_book_info(&[INFO_PAGE.to_string()])
            .unwrap();

        assert_eq!(info.book_name, "测试之书");
        assert_eq!(info.author, "作者名");
        assert_eq!(info.cover_url, "/files/cover/123.jpg");
        assert_eq!(info.summary, "一段简介。");
        assert_eq!(info.update_time, "2024-03-01");
        assert_eq!(info.volumes.len(), 1);

        let ids: Vec<&str> = info.chapters().map(|c| c.chapter_id.as_str()).collect();
        assert_eq!(ids, ["1001", "1002", "1003"]);
        assert_eq!(info.volumes[0].chapters[0].title, "第一章 开端");
    }

    #[test]
    fn test_parse_book_info_is_stable_across_runs() {
        let parser = DeqixsParser;
        let pages = vec![INFO_PAGE.to_string()];
        let first = parser.parse_book_info(&pages).unwrap();
        let second = parser.parse_book_info(&pages).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_book_info_rejects_non_book_page() {
        let parser = DeqixsParser;
        assert!(parser
            .parse_book_info(&["<html><body>404</body></html>".to_string()])
            .is_none());
        assert!(parser.parse_book_info(&[]).is_none());
    }

    #[test]
    fn test_parse_chapter_joins_pages_and_strips_ads() {
        let parser = DeqixsParser;
        let page1 = r#"<html><body>
            <h1>第一章 开端</h1>
            <div class="con">
              <p>段落一。</p>
              <p>得奇小说网为你提供最快更新</p>
              <p>段落二。</p>
            </div></body></html>"#
            .to_string();
        let page2 = r#"<html><body>
            <h1>第一章 开端(2/2)</h1>
            <div class="con">
              <p>段落三。</p>
            </div></body></html>"#
            .to_string();

        let record = parser.parse_chapter(&[page1, page2], "1001").unwrap();
        assert_eq!(record.id, "1001");
        assert_eq!(record.title, "第一章 开端");
        assert_eq!(record.content, "段落一。\n\n段落二。\n\n段落三。");
        assert!(!record.need_refetch);
    }

    #[test]
    fn test_parse_chapter_rejects_unrecognized_page() {
        let parser = DeqixsParser;
        let record = parser.parse_chapter(
            &["<html><body><div id='login'>请登录</div></body></html>".to_string()],
            "1001",
        );
        assert!(record.is_none());
    }

    #[test]
    fn test_chapter_id_from_href() {
        assert_eq!(chapter_id_from_href("/xiaoshuo/123/1001.html").as_deref(), Some("1001"));
        assert_eq!(chapter_id_from_href("1001.html").as_deref(), Some("1001"));
        assert_eq!(chapter_id_from_href("/xiaoshuo/123/"), None);
        assert_eq!(chapter_id_from_href("1001-2.html").as_deref(), Some("1001"));
    }
}
