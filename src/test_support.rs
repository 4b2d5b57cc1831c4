//! Fakes and fixtures shared by unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::BackendApi;
use crate::error::{RelayError, RelayResult};
use crate::models::{LocationType, MenuCatalog, MenuItem, Order, OrderItem, OrderStatus};

enum Scripted {
    Orders(Option<Duration>, Vec<Order>),
    Failure(u16),
}

/// Backend double. Poll responses are scripted in order; once the script
/// runs out every poll returns an empty active set.
#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<VecDeque<Scripted>>,
    menu: Mutex<Vec<MenuItem>>,
    failing_items: Mutex<HashSet<i64>>,
    printed_calls: Mutex<Vec<i64>>,
    status_calls: Mutex<Vec<(i64, OrderStatus)>>,
    fetches: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_orders(&self, orders: Vec<Order>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Orders(None, orders));
    }

    pub fn push_delayed_orders(&self, delay: Duration, orders: Vec<Order>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Orders(Some(delay), orders));
    }

    pub fn push_failure(&self, status: u16) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(status));
    }

    pub fn set_menu(&self, menu: Vec<MenuItem>) {
        *self.menu.lock().unwrap() = menu;
    }

    pub fn fail_item(&self, item_id: i64) {
        self.failing_items.lock().unwrap().insert(item_id);
    }

    pub fn printed_calls(&self) -> Vec<i64> {
        let mut calls = self.printed_calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }

    pub fn status_calls(&self) -> Vec<(i64, OrderStatus)> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn fetch_active_orders(&self) -> RelayResult<Vec<Order>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Orders(delay, orders)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(orders)
            }
            Some(Scripted::Failure(status)) => Err(RelayError::Status {
                status,
                message: "Backend server error".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn mark_item_printed(&self, item_id: i64) -> RelayResult<()> {
        self.printed_calls.lock().unwrap().push(item_id);
        if self.failing_items.lock().unwrap().contains(&item_id) {
            return Err(RelayError::Status {
                status: 500,
                message: "Backend server error".to_string(),
            });
        }
        Ok(())
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> RelayResult<()> {
        self.status_calls.lock().unwrap().push((order_id, status));
        Ok(())
    }

    async fn fetch_menu(&self) -> RelayResult<Vec<MenuItem>> {
        Ok(self.menu.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Dine-in order with `item_count` generic items (ids `id * 100 + n`).
pub fn order(id: i64, item_count: usize) -> Order {
    let items = (0..item_count as i64)
        .map(|n| OrderItem {
            id: id * 100 + n,
            menu_id: 1,
            quantity: 1,
            price: 10000,
            subtotal: 10000,
            ..OrderItem::default()
        })
        .collect();
    Order {
        id,
        status: OrderStatus::Pending,
        location_type: LocationType::DineIn,
        location_number: Some(id.to_string()),
        created_at: "2024-05-01T10:30:00+07:00".to_string(),
        items,
        ..Order::default()
    }
}

pub fn menu() -> Vec<MenuItem> {
    vec![
        MenuItem {
            id: 1,
            name: "Latte".to_string(),
            category: Some("drink".to_string()),
        },
        MenuItem {
            id: 2,
            name: "Croissant".to_string(),
            category: Some("food".to_string()),
        },
        MenuItem {
            id: 3,
            name: "Nasi Goreng*".to_string(),
            category: Some("Makanan".to_string()),
        },
    ]
}

pub fn catalog() -> MenuCatalog {
    MenuCatalog::new(menu())
}

/// Order #501 at table 12: two Latte (drink) and one Croissant (food,
/// already flagged printed on the server).
pub fn order_501() -> Order {
    Order {
        id: 501,
        status: OrderStatus::Processing,
        location_type: LocationType::DineIn,
        location_number: Some("12".to_string()),
        created_at: "2024-05-01T10:30:00+07:00".to_string(),
        total: 23500,
        items: vec![
            OrderItem {
                id: 1,
                menu_id: 1,
                quantity: 2,
                price: 7000,
                subtotal: 14000,
                ..OrderItem::default()
            },
            OrderItem {
                id: 2,
                menu_id: 2,
                quantity: 1,
                price: 9500,
                subtotal: 9500,
                printed: true,
                ..OrderItem::default()
            },
        ],
        ..Order::default()
    }
}
