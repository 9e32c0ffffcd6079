//! 数据访问层
//!
//! Repository 只做 SQL 与模型的映射，不做业务判断。
//! 签到主流程的写操作全部接受事务参数，由服务层统一提交或回滚。

mod balance_repo;
mod signin_repo;

pub use balance_repo::BalanceRepository;
pub use signin_repo::SigninRepository;
