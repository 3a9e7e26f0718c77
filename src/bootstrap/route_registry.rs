use actix_web::web;
use std::collections::BTreeMap;
use tracing::info;

use crate::api;

/// 路由配置函数类型 / Route configuration function, mounted at `path`
pub type RouteConfigFn = fn(&mut web::ServiceConfig, &str);

/// 路由信息结构 / Route entry
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub name: String,
    pub description: String,
    pub module: String,
    pub path: String,
    pub config_fn: RouteConfigFn,
}

impl RouteInfo {
    pub fn new(name: &str, description: &str, module: &str, path: &str, config_fn: RouteConfigFn) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            module: module.to_string(),
            path: path.to_string(),
            config_fn,
        }
    }
}

/// 路由注册器 / Route registry
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: BTreeMap<String, RouteInfo>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部 HTTP 接口 / Every HTTP endpoint group
    pub fn realtime() -> Self {
        let mut registry = Self::new();
        registry.register_route(RouteInfo::new(
            "notifications",
            "通知分发、历史与已读 / dispatch, history and read state",
            "notification",
            "/v1/notifications",
            api::notifications::register,
        ));
        registry.register_route(RouteInfo::new(
            "rooms",
            "房间成员与消息 / room membership and messages",
            "chat",
            "/v1/rooms",
            api::rooms::register,
        ));
        registry.register_route(RouteInfo::new(
            "reports",
            "报告回复 / report replies",
            "report",
            "/v1/reports",
            api::reports::register,
        ));
        registry.register_route(RouteInfo::new(
            "presence",
            "在线状态 / presence",
            "chat",
            "/v1/presence",
            api::presence::register,
        ));
        registry.register_route(RouteInfo::new(
            "health",
            "健康检查 / health check",
            "system",
            "/v1/health",
            api::health::register,
        ));
        registry
    }

    /// 注册路由，同名覆盖 / Register a route; a later entry with the same name wins
    pub fn register_route(&mut self, route_info: RouteInfo) {
        self.routes.insert(route_info.name.clone(), route_info);
    }

    pub fn get_routes(&self) -> &BTreeMap<String, RouteInfo> {
        &self.routes
    }

    /// 获取指定模块的路由
    pub fn get_routes_by_module(&self, module: &str) -> Vec<&RouteInfo> {
        self.routes.values().filter(|route| route.module == module).collect()
    }

    /// 配置所有路由到 ServiceConfig
    pub fn configure_all_routes(&self, cfg: &mut web::ServiceConfig) {
        for route_info in self.routes.values() {
            (route_info.config_fn)(cfg, &route_info.path);
        }
    }

    /// 获取路由统计信息 / Route count and sorted module names
    pub fn get_stats(&self) -> (usize, Vec<String>) {
        let mut modules: Vec<String> = self.routes.values().map(|route| route.module.clone()).collect();
        modules.sort();
        modules.dedup();
        (self.routes.len(), modules)
    }

    /// 打印路由信息
    pub fn log_routes_info(&self) {
        let (total, modules) = self.get_stats();
        for module in &modules {
            for route in self.get_routes_by_module(module) {
                info!("🛣️ [{}] {} -> {}: {}", module, route.name, route.path, route.description);
            }
        }
        info!("总计: {} 个路由组 / {} route groups", total, total);
    }
}

/// 配置全部路由 / Mount every HTTP route
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    RouteRegistry::realtime().configure_all_routes(cfg);
}
