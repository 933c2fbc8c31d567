//! Shared harness for integration tests: in-memory SQLite, seeded catalog
//! and a scripted payment gateway.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use uuid::Uuid;

use tailorcraft_api::config::{AppConfig, GatewayConfig};
use tailorcraft_api::db::{self, DbConfig, DbPool};
use tailorcraft_api::entities::{design, fabric, garment_template, order};
use tailorcraft_api::errors::ServiceError;
use tailorcraft_api::events::{self, EventSender};
use tailorcraft_api::models::{
    FabricAssignments, MeasurementSet, Operator, OperatorRole,
};
use tailorcraft_api::services::designs::CreateDesignRequest;
use tailorcraft_api::services::orders::CreateOrderRequest;
use tailorcraft_api::services::payment_gateway::{
    ChargeRequest, GatewayStatus, GatewayTransaction, PaymentGateway,
};
use tailorcraft_api::services::AppServices;

/// Scripted stand-in for the real gateway.
#[derive(Default)]
pub struct MockGateway {
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub refunds: Mutex<Vec<(String, Decimal)>>,
    pub fail_refunds: std::sync::atomic::AtomicBool,
    pub status_script: Mutex<Option<GatewayStatus>>,
    session_counter: AtomicUsize,
}

impl MockGateway {
    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_transaction(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, ServiceError> {
        self.charges.lock().unwrap().push(request.clone());
        let n = self.session_counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayTransaction {
            token: format!("snap-token-{}", n),
            redirect_url: format!("https://gateway.test/pay/{}", n),
            gateway_order_id: request.order_number.clone(),
        })
    }

    async fn check_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ServiceError> {
        self.status_script
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Gateway has no transaction for '{}'",
                    gateway_order_id
                ))
            })
    }

    async fn refund(
        &self,
        gateway_order_id: &str,
        amount: Decimal,
        _reason: &str,
    ) -> Result<(), ServiceError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "refund rejected by gateway".to_string(),
            ));
        }
        self.refunds
            .lock()
            .unwrap()
            .push((gateway_order_id.to_string(), amount));
        Ok(())
    }
}

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub gateway: Arc<MockGateway>,
    pub event_sender: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn operator(role: OperatorRole) -> Operator {
    Operator {
        id: Uuid::new_v4(),
        role,
    }
}

pub fn admin() -> Operator {
    operator(OperatorRole::Admin)
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        shipping_cost: dec!(25000),
        gateway: GatewayConfig::default(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        // A single connection keeps every query on the same in-memory
        // database.
        let db_config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
        };
        let pool = Arc::new(
            db::establish_connection_with_config(&db_config)
                .await
                .expect("test database"),
        );
        db::run_migrations(&pool).await.expect("migrations");

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let gateway = Arc::new(MockGateway::default());
        let services = AppServices::build(
            pool.clone(),
            &test_config(),
            gateway.clone(),
            event_sender.clone(),
        );

        Self {
            db: pool,
            services,
            gateway,
            event_sender,
            _event_task: event_task,
        }
    }

    /// A two-part shirt template: body uses 2.0m at default chest 100,
    /// sleeves 1.0m at default arm 60.
    pub async fn seed_template(&self) -> garment_template::Model {
        let now = Utc::now();
        garment_template::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Classic Shirt".to_string()),
            default_measurements: Set(MeasurementSet(BTreeMap::from([
                ("body".to_string(), dec!(100)),
                ("sleeves".to_string(), dec!(60)),
            ]))),
            fabric_requirements: Set(MeasurementSet(BTreeMap::from([
                ("body".to_string(), dec!(2.0)),
                ("sleeves".to_string(), dec!(1.0)),
            ]))),
            base_price: Set(dec!(100000)),
            tailor_fee: Set(dec!(150000)),
            service_fee: Set(dec!(20000)),
            completion_time_days: Set(14),
            usage_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await
        .expect("seed template")
    }

    pub async fn seed_fabric(
        &self,
        seller_id: Uuid,
        sku: &str,
        price: Decimal,
        stock: Decimal,
    ) -> fabric::Model {
        let now = Utc::now();
        fabric::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            name: Set(format!("Fabric {}", sku)),
            sku: Set(sku.to_string()),
            price_per_meter: Set(price),
            discount_price: Set(None),
            stock_meter: Set(stock),
            min_order_meter: Set(dec!(0.5)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await
        .expect("seed fabric")
    }

    /// Drafts and completes a design assigning `body_fabric` to the body and
    /// `sleeve_fabric` to the sleeves, with default measurements.
    pub async fn completed_design(
        &self,
        customer: &Operator,
        template: &garment_template::Model,
        body_fabric: Uuid,
        sleeve_fabric: Uuid,
    ) -> design::Model {
        let request = CreateDesignRequest {
            garment_template_id: template.id,
            design_name: "Test shirt".to_string(),
            special_instructions: None,
            fabric_assignments: FabricAssignments(BTreeMap::from([
                ("body".to_string(), body_fabric),
                ("sleeves".to_string(), sleeve_fabric),
            ])),
            custom_measurements: MeasurementSet(BTreeMap::from([
                ("body".to_string(), dec!(100)),
                ("sleeves".to_string(), dec!(60)),
            ])),
        };
        let design = self
            .services
            .designs
            .create_design(customer, request)
            .await
            .expect("create design");
        self.services
            .designs
            .complete_design(customer, design.id)
            .await
            .expect("complete design")
    }

    pub fn order_request(&self, design_id: Uuid, tailor_id: Uuid) -> CreateOrderRequest {
        CreateOrderRequest {
            design_id,
            tailor_id,
            customer_notes: None,
            preferred_completion_date: None,
            shipping_address: "Jl. Merdeka 1".to_string(),
            shipping_city: "Jakarta".to_string(),
            shipping_state: "DKI Jakarta".to_string(),
            shipping_zip_code: "10110".to_string(),
            shipping_country: "ID".to_string(),
            shipping_phone: "+62-812-0000".to_string(),
        }
    }

    /// Creates an order and settles its payment through the webhook path,
    /// leaving it in `fabric_ordering` with fabric sub-orders created.
    pub async fn paid_order(
        &self,
        customer: &Operator,
        design_id: Uuid,
        tailor_id: Uuid,
    ) -> order::Model {
        let order = self
            .services
            .orders
            .create_order(customer, self.order_request(design_id, tailor_id), dec!(25000))
            .await
            .expect("create order");
        let session = self
            .services
            .payments
            .initialize_payment(customer, order.id)
            .await
            .expect("initialize payment");
        self.services
            .payments
            .process_notification(settlement(&session.gateway_order_id))
            .await
            .expect("settle payment")
    }

    pub async fn reload_order(&self, id: Uuid) -> order::Model {
        use sea_orm::EntityTrait;
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn reload_fabric(&self, id: Uuid) -> fabric::Model {
        use sea_orm::EntityTrait;
        fabric::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query fabric")
            .expect("fabric exists")
    }
}

pub fn settlement(gateway_order_id: &str) -> GatewayStatus {
    GatewayStatus {
        order_id: gateway_order_id.to_string(),
        transaction_status: "settlement".to_string(),
        transaction_id: Some(Uuid::new_v4().to_string()),
        payment_type: Some("bank_transfer".to_string()),
        fraud_status: None,
        status_message: None,
    }
}

pub fn notification(gateway_order_id: &str, transaction_status: &str) -> GatewayStatus {
    GatewayStatus {
        order_id: gateway_order_id.to_string(),
        transaction_status: transaction_status.to_string(),
        transaction_id: Some(Uuid::new_v4().to_string()),
        payment_type: Some("credit_card".to_string()),
        fraud_status: None,
        status_message: None,
    }
}
