use serde::{Serialize, Serializer};

use super::repository::{Entity, EntityStore, RepositoryError, SortOrder};

/// Page offset as supplied on the query string.
///
/// Missing, non-numeric, non-finite, or zero offsets become `0`; anything else is
/// clamped to at least `1`. Offsets count pages, not records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offset(f64);

impl Offset {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.and_then(|value| value.trim().parse::<f64>().ok()) {
            Some(value) if value.is_finite() && value != 0.0 => Offset(value.max(1.0)),
            _ => Offset(0.0),
        }
    }

    pub fn pages(value: u32) -> Self {
        Self::parse(Some(&value.to_string()))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    fn skip(self, page_size: usize) -> usize {
        (self.0 * page_size as f64).floor() as usize
    }
}

impl Serialize for Offset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.fract() == 0.0 {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

/// One page of a listing plus the bookkeeping a client needs to fetch the next.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: usize,
    #[serde(rename = "result")]
    pub items: Vec<T>,
    #[serde(rename = "next")]
    pub has_more: bool,
    pub offset: Offset,
}

pub fn paginate<E, St>(
    store: &St,
    offset: Offset,
    filter: &E::Filter,
    order: SortOrder,
    page_size: usize,
) -> Result<Page<E>, RepositoryError>
where
    E: Entity,
    St: EntityStore<E> + ?Sized,
{
    let items = store.page(filter, order, offset.skip(page_size), page_size)?;
    let count = store.count_where(filter)?;
    let has_more = count as f64 > offset.value() * page_size as f64 + items.len() as f64;

    Ok(Page {
        count,
        items,
        has_more,
        offset,
    })
}
