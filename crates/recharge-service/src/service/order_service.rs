//! 合作方订单服务
//!
//! 两个下单渠道共用：合作方鉴权之后，把请求归一成 `CreateOrderCommand` 交给这里。
//! 同渠道 out_trade_num 重复时返回原订单，不重复创建。

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{RechargeError, Result};
use crate::models::{
    NewOrder, Order, OrderClient, OrderStatus, PlatformAccount, generate_order_number,
};
use crate::repository::{OrderRepositoryTrait, PlatformAccountRepositoryTrait, ProductRepositoryTrait};
use crate::service::dispatch::DispatchService;
use crate::service::dto::{CreateOrderCommand, CreatedOrder};

pub struct OrderService {
    orders: Arc<dyn OrderRepositoryTrait>,
    products: Arc<dyn ProductRepositoryTrait>,
    accounts: Arc<dyn PlatformAccountRepositoryTrait>,
    dispatch: Arc<DispatchService>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepositoryTrait>,
        products: Arc<dyn ProductRepositoryTrait>,
        accounts: Arc<dyn PlatformAccountRepositoryTrait>,
        dispatch: Arc<DispatchService>,
    ) -> Self {
        Self {
            orders,
            products,
            accounts,
            dispatch,
        }
    }

    /// 按 app_key 查找启用中的合作方账号
    pub async fn account_by_app_key(&self, app_key: &str) -> Result<PlatformAccount> {
        self.accounts
            .get_by_app_key(app_key)
            .await?
            .filter(PlatformAccount::is_active)
            .ok_or_else(|| RechargeError::AccountNotFound(app_key.to_string()))
    }

    /// 按渠道内账号名查找启用中的合作方账号
    pub async fn account_by_name(
        &self,
        platform_code: &str,
        account_name: &str,
    ) -> Result<PlatformAccount> {
        self.accounts
            .get_by_account_name(platform_code, account_name)
            .await?
            .filter(PlatformAccount::is_active)
            .ok_or_else(|| RechargeError::AccountNotFound(account_name.to_string()))
    }

    /// 创建合作方订单并派单
    ///
    /// 1. 按 out_trade_num 查重 -> 2. 校验商品与面值 -> 3. 落库（待充值）-> 4. 创建充值任务
    ///
    /// 重复请求只返回原订单。派单中途失败、停在待充值的订单由重试扫描重新入队，不靠合作方重推。
    #[instrument(skip(self, account, command), fields(account = %account.account_name, out_trade_num = %command.out_trade_num))]
    pub async fn create_order(
        &self,
        account: &PlatformAccount,
        client: OrderClient,
        command: CreateOrderCommand,
    ) -> Result<CreatedOrder> {
        if let Some(existing) = self
            .orders
            .get_by_out_trade_num(client, &command.out_trade_num)
            .await?
        {
            return self.existing(existing).await;
        }

        let route = self
            .products
            .get_route(command.product_id)
            .await?
            .filter(|r| r.is_on_sale())
            .ok_or(RechargeError::ProductNotFound(command.product_id))?;

        if let Some(amount) = command.amount {
            if amount != route.denom {
                return Err(RechargeError::Validation(format!(
                    "面值与商品不符: 请求 {amount}, 商品 {}",
                    route.denom
                )));
            }
        }

        let new_order = NewOrder {
            order_number: generate_order_number(),
            out_trade_num: command.out_trade_num.clone(),
            customer_id: account.bind_user_id,
            mobile: command.mobile,
            product_id: route.product_id,
            denom: route.denom,
            price: route.price,
            status: OrderStatus::PendingRecharge,
            client,
            platform_code: Some(route.platform_code),
            provider_sku: Some(route.provider_sku),
            platform_account_id: account.id,
            isp: command.isp,
            notify_url: command.notify_url.filter(|u| !u.is_empty()),
            remark: command.remark,
            param1: command.param1,
            param2: command.param2,
            param3: command.param3,
        };

        let order = match self.orders.create(new_order).await {
            Ok(order) => order,
            Err(RechargeError::DuplicateOrder(out_trade_num)) => {
                // 并发请求在唯一约束上输掉，返回胜出的那一单
                let existing = self
                    .orders
                    .get_by_out_trade_num(client, &out_trade_num)
                    .await?
                    .ok_or(RechargeError::DuplicateOrder(out_trade_num))?;
                return self.existing(existing).await;
            }
            Err(e) => return Err(e),
        };
        info!(order_number = %order.order_number, "订单已创建");

        let order = self.dispatch.create_recharge_task(order.id).await?;
        Ok(CreatedOrder {
            order,
            duplicate: false,
        })
    }

    async fn existing(&self, order: Order) -> Result<CreatedOrder> {
        info!(order_number = %order.order_number, status = %order.status, "订单已存在，返回原订单");
        Ok(CreatedOrder {
            order,
            duplicate: true,
        })
    }

    /// 合作方按自己的订单号查单，只能查到本账号的订单
    pub async fn find_partner_order(
        &self,
        account: &PlatformAccount,
        client: OrderClient,
        out_trade_num: &str,
    ) -> Result<Order> {
        self.orders
            .get_by_out_trade_num(client, out_trade_num)
            .await?
            .filter(|o| o.platform_account_id == account.id)
            .ok_or_else(|| RechargeError::OrderNotFound(out_trade_num.to_string()))
    }
}
