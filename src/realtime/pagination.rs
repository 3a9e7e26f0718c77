//! 分页游标服务 / Pagination cursor service
//!
//! 游标有两种形式：页码 (`p:N@H`) 与序号水位 (`s:N`)。页码游标固定在首次读取时的
//! 头部序号 `H` 上，因此两种游标在并发写入下都不会重复返回条目。
//! Cursors are either a page number (`p:N@H`) or a sequence watermark (`s:N`). A page
//! cursor is pinned to the head seq `H` seen by the first read, so neither kind re-returns
//! an item when new items arrive at the head.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::realtime::validation::ValidationError;

/// 排序方向 / Sort direction over the sequence key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    /// 最新在前 / most recent first
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(ValidationError::single("order", "must be one of: asc, desc")),
        }
    }
}

impl SortOrder {
    /// 可选查询参数，缺省为降序 / Optional query parameter, `Desc` when absent
    pub fn from_param(order: Option<&str>) -> Result<Self, ValidationError> {
        order.map(str::parse).transpose().map(Option::unwrap_or_default)
    }
}

/// 分页游标 / Opaque pagination cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// 从 1 开始的页码；`head` 为首页读取时的最大序号
    /// 1-based page number over the items with `seq <= head`, where `head` is the
    /// newest seq at the first read. `None` pins to the current head.
    Page { page: u32, head: Option<u64> },
    /// 序号水位：下一页从该序号之后（按方向）开始 / Continue past this sequence number
    Seq(u64),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Page { page, head: Some(head) } => write!(f, "p:{}@{}", page, head),
            Cursor::Page { page, head: None } => write!(f, "p:{}", page),
            Cursor::Seq(seq) => write!(f, "s:{}", seq),
        }
    }
}

impl FromStr for Cursor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::single("cursor", "malformed cursor");
        let (prefix, value) = s.split_once(':').ok_or_else(malformed)?;
        match prefix {
            "p" => {
                let (page, head) = match value.split_once('@') {
                    Some((page, head)) => (page, Some(head.parse::<u64>().map_err(|_| malformed())?)),
                    None => (value, None),
                };
                match page.parse::<u32>() {
                    Ok(page) if page >= 1 => Ok(Cursor::Page { page, head }),
                    _ => Err(malformed()),
                }
            }
            "s" => value.parse::<u64>().map(Cursor::Seq).map_err(|_| malformed()),
            _ => Err(malformed()),
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 分页请求 / Page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub limit: usize,
    pub order: SortOrder,
}

impl PageRequest {
    pub fn first(limit: usize, order: SortOrder) -> Self {
        Self { cursor: None, limit, order }
    }

    pub fn after(cursor: Cursor, limit: usize, order: SortOrder) -> Self {
        Self { cursor: Some(cursor), limit, order }
    }
}

/// 一页结果 / One page of items
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 到达末尾时为 None / `None` exactly when the page reaches the end
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self { items: Vec::new(), next_cursor: None }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page { items: self.items.into_iter().map(f).collect(), next_cursor: self.next_cursor }
    }
}

/// 具有单调序号的实体 / Entity ordered by a monotonic sequence number
pub trait Sequenced {
    fn seq(&self) -> u64;
}

/// 对按序号升序排列的切片分页 / Page over a slice sorted ascending by `seq`
///
/// 首页（无游标）从集合头部开始：升序为最早，降序为最新。
/// The first page starts at the head: oldest for `Asc`, newest for `Desc`.
pub fn paginate_sequenced<T: Sequenced + Clone>(items: &[T], request: &PageRequest) -> Page<T> {
    let limit = request.limit.max(1);

    let page: Vec<T> = match (request.order, request.cursor) {
        (order, Some(Cursor::Page { page, head })) => {
            let view = pinned(items, head);
            let offset = (page as usize).saturating_sub(1).saturating_mul(limit);
            match order {
                SortOrder::Asc => view.iter().skip(offset).take(limit).cloned().collect(),
                SortOrder::Desc => view.iter().rev().skip(offset).take(limit).cloned().collect(),
            }
        }
        (SortOrder::Asc, watermark) => {
            let start = match watermark {
                Some(Cursor::Seq(w)) => items.partition_point(|item| item.seq() <= w),
                _ => 0,
            };
            items[start..].iter().take(limit).cloned().collect()
        }
        (SortOrder::Desc, watermark) => {
            let end = match watermark {
                Some(Cursor::Seq(w)) => items.partition_point(|item| item.seq() < w),
                _ => items.len(),
            };
            items[..end].iter().rev().take(limit).cloned().collect()
        }
    };

    let next_cursor = next_cursor_for(items, request, &page, limit);
    Page { items: page, next_cursor }
}

/// 截止到 `head` 的视图 / Items with `seq <= head`
fn pinned<T: Sequenced>(items: &[T], head: Option<u64>) -> &[T] {
    match head {
        Some(head) => &items[..items.partition_point(|item| item.seq() <= head)],
        None => items,
    }
}

fn next_cursor_for<T: Sequenced>(all: &[T], request: &PageRequest, page: &[T], limit: usize) -> Option<Cursor> {
    let last = page.last()?;
    match request.cursor {
        Some(Cursor::Page { page: n, head }) => {
            let view = pinned(all, head);
            let head = head.or_else(|| view.last().map(Sequenced::seq));
            let consumed = (n as usize).saturating_mul(limit);
            (consumed < view.len()).then_some(Cursor::Page { page: n + 1, head })
        }
        _ => {
            let more = match request.order {
                SortOrder::Asc => all.last().map(|tail| tail.seq() > last.seq()).unwrap_or(false),
                SortOrder::Desc => all.first().map(|head| head.seq() < last.seq()).unwrap_or(false),
            };
            more.then_some(Cursor::Seq(last.seq()))
        }
    }
}

/// 分页服务：统一页大小边界 / Page size policy shared by every collection
#[derive(Debug, Clone, Copy)]
pub struct PaginationService {
    default_page_size: usize,
    max_page_size: usize,
}

impl PaginationService {
    pub fn new(default_page_size: usize, max_page_size: usize) -> Self {
        let max_page_size = max_page_size.max(1);
        Self {
            default_page_size: default_page_size.clamp(1, max_page_size),
            max_page_size,
        }
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// 限制页大小 / Clamp a requested page size into `[1, max]`
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_page_size).clamp(1, self.max_page_size)
    }

    /// 解析客户端请求 / Build a request from raw client input
    pub fn request(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
        order: SortOrder,
    ) -> Result<PageRequest, ValidationError> {
        let cursor = cursor.filter(|c| !c.is_empty()).map(str::parse).transpose()?;
        Ok(PageRequest { cursor, limit: self.clamp_limit(limit), order })
    }

    /// 页码请求（报告回复）/ Page-number request, used by report replies
    ///
    /// `head` 来自上一页的游标 / `head` comes from the previous page's cursor
    pub fn page_number_request(
        &self,
        page: Option<u32>,
        head: Option<u64>,
        limit: Option<usize>,
        order: SortOrder,
    ) -> Result<PageRequest, ValidationError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(ValidationError::single("page", "must be greater than or equal to 1"));
        }
        Ok(PageRequest::after(Cursor::Page { page, head }, self.clamp_limit(limit), order))
    }
}

/// RFC 5988 Link 头：仅下一页 / Link header pointing at the next page, if any
///
/// 用于接受 `cursor` 参数的接口 / For endpoints taking a `cursor` query parameter
pub fn build_link_header(base_url: &str, next: Option<Cursor>, request: &PageRequest) -> Option<String> {
    let next = next?;
    let mut query = format!("cursor={}&limit={}", next, request.limit);
    if request.order == SortOrder::Asc {
        query.push_str("&order=asc");
    }
    Some(format!("<{}?{}>; rel=\"next\"", base_url, query))
}

/// 页码式 Link 头 / Link header for endpoints taking `page`, `limit` and `head`
pub fn build_page_link_header(base_url: &str, next: Option<Cursor>, limit: usize) -> Option<String> {
    match next? {
        Cursor::Page { page, head } => {
            let mut query = format!("page={}&limit={}", page, limit);
            if let Some(head) = head {
                query.push_str(&format!("&head={}", head));
            }
            Some(format!("<{}?{}>; rel=\"next\"", base_url, query))
        }
        Cursor::Seq(_) => None,
    }
}
