//! Property listing read model.
//!
//! `ListingStore` is the seam the chat pipeline queries through; the SQLite
//! `ListingRepository` is the production implementation.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::debug;

use abode_core::error::AbodeError;
use abode_core::types::{Listing, PriceField, PropertyFilters, PropertySearch};

use crate::db::Database;

/// Hard cap on rows returned by a single search.
pub const MAX_SEARCH_ROWS: usize = 10;

/// Read access to approved, available property listings.
pub trait ListingStore: Send + Sync {
    /// Search listings matching `filters`, newest first, returning at most
    /// `min(limit, MAX_SEARCH_ROWS)` rows plus the total match count.
    fn search(&self, filters: &PropertyFilters, limit: usize)
        -> Result<PropertySearch, AbodeError>;
}

/// SQLite-backed listing store.
pub struct ListingRepository {
    db: Arc<Database>,
}

impl ListingRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a listing.
    pub fn insert(&self, listing: &Listing) -> Result<(), AbodeError> {
        let images = serde_json::to_string(&listing.images)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO properties
                    (id, title, description, monthly_rent, sale_price, bedrooms, bathrooms,
                     area, city, state, address, listing_type, property_type, images,
                     status, is_approved, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    listing.id,
                    listing.title,
                    listing.description,
                    listing.monthly_rent,
                    listing.sale_price,
                    listing.bedrooms,
                    listing.bathrooms,
                    listing.area,
                    listing.city,
                    listing.state,
                    listing.address,
                    listing.listing_type,
                    listing.property_type,
                    images,
                    listing.status,
                    listing.is_approved as i32,
                    listing.created_at.timestamp(),
                ],
            )
            .map_err(|e| AbodeError::ListingStore(format!("Failed to insert listing: {}", e)))?;
            Ok(())
        })
    }
}

impl ListingStore for ListingRepository {
    fn search(
        &self,
        filters: &PropertyFilters,
        limit: usize,
    ) -> Result<PropertySearch, AbodeError> {
        let limit = limit.min(MAX_SEARCH_ROWS);

        let mut clauses: Vec<&str> = vec!["is_approved = 1", "status = 'available'"];
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(listing_type) = filters.listing_type {
            clauses.push("listing_type = ?");
            params_vec.push(Box::new(listing_type.as_str().to_string()));
        }
        if let Some(bedrooms) = filters.bedrooms {
            clauses.push("bedrooms = ?");
            params_vec.push(Box::new(bedrooms as i64));
        }
        clauses.push("property_type = ?");
        params_vec.push(Box::new(filters.property_type.clone()));
        if let Some(ref city) = filters.city {
            clauses.push("LOWER(city) LIKE ? ESCAPE '\\'");
            params_vec.push(Box::new(format!("%{}%", escape_like(&city.to_lowercase()))));
        }
        if let Some(max_price) = filters.max_price {
            clauses.push(match filters.price_field {
                PriceField::MonthlyRent => "monthly_rent <= ?",
                PriceField::SalePrice => "sale_price <= ?",
                PriceField::Either => "COALESCE(monthly_rent, sale_price) <= ?",
            });
            params_vec.push(Box::new(max_price.min(i64::MAX as u64) as i64));
        }

        let where_clause = clauses.join(" AND ");
        let count_sql = format!("SELECT COUNT(*) FROM properties WHERE {}", where_clause);
        let select_sql = format!(
            "SELECT id, title, description, monthly_rent, sale_price, bedrooms, bathrooms,
                    area, city, state, address, listing_type, property_type, images,
                    status, is_approved, created_at
             FROM properties
             WHERE {}
             ORDER BY created_at DESC, rowid DESC
             LIMIT {}",
            where_clause, limit
        );

        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        self.db.with_conn(|conn| {
            let total: i64 = conn
                .query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))
                .map_err(|e| AbodeError::ListingStore(format!("Listing count: {}", e)))?;

            let mut stmt = conn
                .prepare(&select_sql)
                .map_err(|e| AbodeError::ListingStore(format!("Listing query prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| Ok(row_to_listing(row)))
                .map_err(|e| AbodeError::ListingStore(format!("Listing query: {}", e)))?;

            let mut listings = Vec::new();
            for row in rows {
                let listing = row.map_err(|e| AbodeError::ListingStore(e.to_string()))??;
                listings.push(listing);
            }

            debug!(total, returned = listings.len(), "Property search complete");

            Ok(PropertySearch {
                listings,
                total: total.max(0) as u64,
                applied_filters: filters.clone(),
            })
        })
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_listing(row: &rusqlite::Row<'_>) -> Result<Listing, AbodeError> {
    let err = |e: rusqlite::Error| AbodeError::ListingStore(e.to_string());
    let images_json: String = row.get(13).map_err(err)?;
    let is_approved: i64 = row.get(15).map_err(err)?;
    let created_at: i64 = row.get(16).map_err(err)?;

    Ok(Listing {
        id: row.get(0).map_err(err)?,
        title: row.get(1).map_err(err)?,
        description: row.get(2).map_err(err)?,
        monthly_rent: row.get(3).map_err(err)?,
        sale_price: row.get(4).map_err(err)?,
        bedrooms: row.get(5).map_err(err)?,
        bathrooms: row.get(6).map_err(err)?,
        area: row.get(7).map_err(err)?,
        city: row.get(8).map_err(err)?,
        state: row.get(9).map_err(err)?,
        address: row.get(10).map_err(err)?,
        listing_type: row.get(11).map_err(err)?,
        property_type: row.get(12).map_err(err)?,
        images: serde_json::from_str(&images_json).unwrap_or_default(),
        status: row.get(14).map_err(err)?,
        is_approved: is_approved != 0,
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .unwrap_or_default(),
    })
}
