use anchor_lang::prelude::*;
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{
    close_account, transfer_checked, CloseAccount, Mint, Token, TokenAccount, TransferChecked,
};

declare_id!("4L3fe5D19tXjxTL5xXhbV9odunt3DDznbNerKcoC8YQP");

pub const ESCROW_SEED: &[u8] = b"escrow";

#[program]
pub mod atomic_escrow {
    use super::*;

    /// Records the terms in a PDA and locks `deposit` of asset A in a vault
    /// owned by that PDA.
    pub fn make(ctx: Context<Make>, seed: u64, deposit: u64, receive: u64) -> Result<()> {
        require!(deposit > 0, EscrowError::ZeroDeposit);
        require!(receive > 0, EscrowError::ZeroExpected);
        require_keys_neq!(
            ctx.accounts.asset_a.key(),
            ctx.accounts.asset_b.key(),
            EscrowError::IdenticalAssets
        );
        require!(
            ctx.accounts.maker_ata_a.amount >= deposit,
            EscrowError::InsufficientFunds
        );

        ctx.accounts.escrow.set_inner(EscrowRecord {
            seed,
            maker: ctx.accounts.maker.key(),
            asset_a: ctx.accounts.asset_a.key(),
            asset_b: ctx.accounts.asset_b.key(),
            amount_b_expected: receive,
            amount_a_deposited: deposit,
            bump: ctx.bumps.escrow,
        });

        transfer_checked(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                TransferChecked {
                    from: ctx.accounts.maker_ata_a.to_account_info(),
                    mint: ctx.accounts.asset_a.to_account_info(),
                    to: ctx.accounts.vault.to_account_info(),
                    authority: ctx.accounts.maker.to_account_info(),
                },
            ),
            deposit,
            ctx.accounts.asset_a.decimals,
        )?;

        msg!("Escrow opened: {} of A for {} of B", deposit, receive);
        emit!(EscrowOpened {
            escrow: ctx.accounts.escrow.key(),
            maker: ctx.accounts.maker.key(),
            seed,
            deposit,
            receive,
        });
        Ok(())
    }

    /// Pays the maker in asset B, empties the vault to the taker and closes
    /// both escrow accounts. Storage deposits go back to the maker.
    pub fn take(ctx: Context<Take>) -> Result<()> {
        let escrow = &ctx.accounts.escrow;
        let released = ctx.accounts.vault.amount;
        let paid = escrow.amount_b_expected;

        transfer_checked(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                TransferChecked {
                    from: ctx.accounts.taker_ata_b.to_account_info(),
                    mint: ctx.accounts.asset_b.to_account_info(),
                    to: ctx.accounts.maker_ata_b.to_account_info(),
                    authority: ctx.accounts.taker.to_account_info(),
                },
            ),
            paid,
            ctx.accounts.asset_b.decimals,
        )?;

        let maker = ctx.accounts.maker.key();
        let seed = escrow.seed.to_le_bytes();
        let bump = [escrow.bump];
        let signer_seeds: &[&[&[u8]]] = &[&[ESCROW_SEED, maker.as_ref(), &seed, &bump]];

        transfer_checked(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                TransferChecked {
                    from: ctx.accounts.vault.to_account_info(),
                    mint: ctx.accounts.asset_a.to_account_info(),
                    to: ctx.accounts.taker_ata_a.to_account_info(),
                    authority: ctx.accounts.escrow.to_account_info(),
                },
                signer_seeds,
            ),
            released,
            ctx.accounts.asset_a.decimals,
        )?;

        close_account(CpiContext::new_with_signer(
            ctx.accounts.token_program.to_account_info(),
            CloseAccount {
                account: ctx.accounts.vault.to_account_info(),
                destination: ctx.accounts.maker.to_account_info(),
                authority: ctx.accounts.escrow.to_account_info(),
            },
            signer_seeds,
        ))?;

        // The `close = maker` constraint destroys the record
        msg!("Escrow taken: released {}, paid {}", released, paid);
        emit!(EscrowTaken {
            escrow: ctx.accounts.escrow.key(),
            taker: ctx.accounts.taker.key(),
            released,
            paid,
        });
        Ok(())
    }

    /// Returns the vault to the maker and closes both escrow accounts.
    pub fn cancel(ctx: Context<Cancel>) -> Result<()> {
        let escrow = &ctx.accounts.escrow;
        let refunded = ctx.accounts.vault.amount;

        let maker = ctx.accounts.maker.key();
        let seed = escrow.seed.to_le_bytes();
        let bump = [escrow.bump];
        let signer_seeds: &[&[&[u8]]] = &[&[ESCROW_SEED, maker.as_ref(), &seed, &bump]];

        transfer_checked(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                TransferChecked {
                    from: ctx.accounts.vault.to_account_info(),
                    mint: ctx.accounts.asset_a.to_account_info(),
                    to: ctx.accounts.maker_ata_a.to_account_info(),
                    authority: ctx.accounts.escrow.to_account_info(),
                },
                signer_seeds,
            ),
            refunded,
            ctx.accounts.asset_a.decimals,
        )?;

        close_account(CpiContext::new_with_signer(
            ctx.accounts.token_program.to_account_info(),
            CloseAccount {
                account: ctx.accounts.vault.to_account_info(),
                destination: ctx.accounts.maker.to_account_info(),
                authority: ctx.accounts.escrow.to_account_info(),
            },
            signer_seeds,
        ))?;

        msg!("Escrow cancelled: refunded {}", refunded);
        emit!(EscrowCancelled {
            escrow: ctx.accounts.escrow.key(),
            refunded,
        });
        Ok(())
    }
}

#[account]
#[derive(InitSpace)]
pub struct EscrowRecord {
    pub seed: u64,
    pub maker: Pubkey,
    pub asset_a: Pubkey,
    pub asset_b: Pubkey,
    pub amount_b_expected: u64,
    pub amount_a_deposited: u64,
    pub bump: u8,
}

#[derive(Accounts)]
#[instruction(seed: u64)]
pub struct Make<'info> {
    #[account(mut)]
    pub maker: Signer<'info>,

    pub asset_a: Account<'info, Mint>,

    pub asset_b: Account<'info, Mint>,

    #[account(
        mut,
        associated_token::mint = asset_a,
        associated_token::authority = maker
    )]
    pub maker_ata_a: Account<'info, TokenAccount>,

    #[account(
        init,
        payer = maker,
        space = 8 + EscrowRecord::INIT_SPACE,
        seeds = [ESCROW_SEED, maker.key().as_ref(), seed.to_le_bytes().as_ref()],
        bump
    )]
    pub escrow: Account<'info, EscrowRecord>,

    /// Owned by the escrow PDA; nobody holds a key for it.
    #[account(
        init,
        payer = maker,
        associated_token::mint = asset_a,
        associated_token::authority = escrow
    )]
    pub vault: Account<'info, TokenAccount>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

#[derive(Accounts)]
pub struct Take<'info> {
    #[account(mut)]
    pub taker: Signer<'info>,

    /// Receives asset B and the storage deposits
    #[account(mut)]
    pub maker: SystemAccount<'info>,

    pub asset_a: Account<'info, Mint>,

    pub asset_b: Account<'info, Mint>,

    #[account(
        mut,
        close = maker,
        seeds = [ESCROW_SEED, maker.key().as_ref(), escrow.seed.to_le_bytes().as_ref()],
        bump = escrow.bump,
        has_one = maker @ EscrowError::Unauthorized,
        has_one = asset_a @ EscrowError::AssetMismatch,
        has_one = asset_b @ EscrowError::AssetMismatch
    )]
    pub escrow: Account<'info, EscrowRecord>,

    #[account(
        mut,
        associated_token::mint = asset_a,
        associated_token::authority = escrow,
        constraint = vault.amount == escrow.amount_a_deposited @ EscrowError::VaultBalanceMismatch
    )]
    pub vault: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = taker,
        associated_token::mint = asset_a,
        associated_token::authority = taker
    )]
    pub taker_ata_a: Account<'info, TokenAccount>,

    #[account(
        mut,
        associated_token::mint = asset_b,
        associated_token::authority = taker,
        constraint = taker_ata_b.amount >= escrow.amount_b_expected @ EscrowError::InsufficientFunds
    )]
    pub taker_ata_b: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = taker,
        associated_token::mint = asset_b,
        associated_token::authority = maker
    )]
    pub maker_ata_b: Account<'info, TokenAccount>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

#[derive(Accounts)]
pub struct Cancel<'info> {
    #[account(mut)]
    pub maker: Signer<'info>,

    pub asset_a: Account<'info, Mint>,

    #[account(
        mut,
        close = maker,
        seeds = [ESCROW_SEED, maker.key().as_ref(), escrow.seed.to_le_bytes().as_ref()],
        bump = escrow.bump,
        has_one = maker @ EscrowError::Unauthorized,
        has_one = asset_a @ EscrowError::AssetMismatch
    )]
    pub escrow: Account<'info, EscrowRecord>,

    #[account(
        mut,
        associated_token::mint = asset_a,
        associated_token::authority = escrow
    )]
    pub vault: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = maker,
        associated_token::mint = asset_a,
        associated_token::authority = maker
    )]
    pub maker_ata_a: Account<'info, TokenAccount>,

    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
}

#[event]
pub struct EscrowOpened {
    pub escrow: Pubkey,
    pub maker: Pubkey,
    pub seed: u64,
    pub deposit: u64,
    pub receive: u64,
}

#[event]
pub struct EscrowTaken {
    pub escrow: Pubkey,
    pub taker: Pubkey,
    pub released: u64,
    pub paid: u64,
}

#[event]
pub struct EscrowCancelled {
    pub escrow: Pubkey,
    pub refunded: u64,
}

#[error_code]
pub enum EscrowError {
    #[msg("Deposit amount must be non-zero.")]
    ZeroDeposit,
    #[msg("Expected amount must be non-zero.")]
    ZeroExpected,
    #[msg("Asset A and asset B must differ.")]
    IdenticalAssets,
    #[msg("Insufficient funds.")]
    InsufficientFunds,
    #[msg("Asset does not match the escrow terms.")]
    AssetMismatch,
    #[msg("Caller is not the maker of this escrow.")]
    Unauthorized,
    #[msg("Vault balance differs from the deposited amount.")]
    VaultBalanceMismatch,
}
